//! Swappable callback types crossing the control/packet-path boundary
//! (§9 "pluggable handler slots"): modeled as atomically-swapped immutable
//! function values rather than the source's reassignable mutable fields.

use std::sync::Arc;

use sfu_core::PacketInfo;
use sfu_rtcp::RtcpPacket;

/// Installed via `setIncomingRtpHandler`/`setIncomingRtcpHandler`; receives
/// fully-parsed forwardable packets at the end of a receive subgraph.
pub type PacketHandler = dyn Fn(&[PacketInfo]) + Send + Sync;

/// Hands a locally generated RTCP packet (RR, NACK, TCC feedback) to the
/// send pipeline's SRTCP-encrypt entry point.
pub type RtcpSender = Arc<dyn Fn(RtcpPacket) + Send + Sync>;

/// Receives per-CSRC audio levels extracted by `AudioLevelReader`.
/// `(ssrc, voice_activity, level_dbov)`.
pub type AudioLevelListener = Arc<dyn Fn(u32, bool, u8) + Send + Sync>;
