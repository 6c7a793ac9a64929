//! [`PacketInfo`]: the one mutable envelope that travels through a pipeline,
//! reinterpreted in place as nodes parse deeper into the wire format.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use sfu_rtcp::RtcpPacket;
use sfu_rtp::RtpPacket;

/// Codec metadata a `VideoParser` node attaches to a video RTP packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoFrameMeta {
    pub is_keyframe: bool,
    pub temporal_id: Option<u8>,
    pub spatial_id: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct VideoRtpPacket {
    pub packet: RtpPacket,
    pub meta: VideoFrameMeta,
}

/// One packet's interpretation at its current pipeline stage. Variants move
/// strictly "downstream": a node reinterprets the buffer into the next
/// variant and replaces it in place, it never widens backwards.
#[derive(Clone)]
pub enum PacketKind {
    /// Bytes as read off the socket, protocol undetermined.
    Raw(Bytes),
    /// Confirmed to be the SRTP wire protocol (RTP or RTCP, not yet told apart).
    SrtpProtocol(Bytes),
    /// Routed to the RTP branch, still encrypted.
    Srtp(Bytes),
    /// Routed to the RTCP branch, still encrypted.
    Srtcp(Bytes),
    /// Decrypted and header-parsed, media type not yet classified.
    Rtp(RtpPacket),
    Audio(RtpPacket),
    Video(VideoRtpPacket),
    /// Decrypted compound RTCP buffer, not yet split into elements.
    Rtcp(Vec<RtcpPacket>),
    /// One element of a compound RTCP datagram, post-split.
    RtcpElement(RtcpPacket),
}

impl PacketKind {
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Raw(b) | Self::SrtpProtocol(b) | Self::Srtp(b) | Self::Srtcp(b) => b.len(),
            Self::Rtp(p) | Self::Audio(p) => p.raw().len(),
            Self::Video(v) => v.packet.raw().len(),
            // Compound buffer size is counted at the SRTCP stage, before it's parsed into elements.
            Self::Rtcp(_) | Self::RtcpElement(_) => 0,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::SrtpProtocol(_) => "srtp-protocol",
            Self::Srtp(_) => "srtp",
            Self::Srtcp(_) => "srtcp",
            Self::Rtp(_) => "rtp",
            Self::Audio(_) => "audio-rtp",
            Self::Video(_) => "video-rtp",
            Self::Rtcp(_) => "rtcp",
            Self::RtcpElement(_) => "rtcp-element",
        }
    }
}

/// One packet's envelope as it travels the graph: its current interpretation,
/// a diagnostic timeline of pipeline stages visited, and (optionally) the
/// form it had before a lossy reinterpretation, for post-mortem dumping.
#[derive(Clone)]
pub struct PacketInfo {
    pub kind: PacketKind,
    pub received_at: Instant,
    timeline: Vec<(String, u64)>,
    prior_form: Option<Arc<PacketInfo>>,
}

impl PacketInfo {
    #[must_use]
    pub fn new(kind: PacketKind, received_at: Instant) -> Self {
        Self {
            kind,
            received_at,
            timeline: Vec::new(),
            prior_form: None,
        }
    }

    /// Appends a timeline entry with an elapsed-nanoseconds timestamp
    /// relative to `received_at`.
    pub fn mark(&mut self, label: impl Into<String>) {
        let elapsed = self.received_at.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.timeline.push((label.into(), elapsed));
    }

    #[must_use]
    pub fn timeline(&self) -> &[(String, u64)] {
        &self.timeline
    }

    /// Stashes `prior` as this packet's pre-reinterpretation form, for
    /// diagnostic dumping if a later parse step fails.
    pub fn with_prior_form(mut self, prior: PacketInfo) -> Self {
        self.prior_form = Some(Arc::new(prior));
        self
    }

    #[must_use]
    pub fn prior_form(&self) -> Option<&PacketInfo> {
        self.prior_form.as_deref()
    }

    /// Produces a sibling `PacketInfo` for one element of a split compound
    /// packet: same `received_at` and timeline prefix, independent kind and
    /// future timeline entries.
    #[must_use]
    pub fn fork(&self, kind: PacketKind) -> PacketInfo {
        PacketInfo {
            kind,
            received_at: self.received_at,
            timeline: self.timeline.clone(),
            prior_form: self.prior_form.clone(),
        }
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.kind.byte_len()
    }
}
