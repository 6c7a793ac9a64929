//! Assembles the send pipeline topology (C7, §4.5): the mirror image of
//! the receive side. `build()` wires a classify demux (audio/video/RTCP)
//! down to a shared SRTP/SRTCP-encrypt-then-enqueue tail; RTCP generated
//! inside the SFU (RR, NACK, TCC feedback) skips the classify step and
//! enters directly at `rtcp_entry`, the head of the RTCP-encode/encrypt
//! sub-chain, via [`make_rtcp_sender`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use sfu_core::{Node, PacketInfo, PacketKind, PipelineBuilder};
use sfu_rtcp::{encode_packet, RtcpPacket};

use crate::callback::RtcpSender;
use crate::config::TransceiverConfig;
use crate::nodes::packet_of;
use crate::state::TransceiverState;

/// Shared handles into a built send pipeline.
pub struct SendPipeline {
    /// Entry point for `sendRtp`/`sendRtcp`: classifies by the packet's
    /// already-tagged kind (`Audio`/`Video`/`RtcpElement`).
    pub root: Arc<dyn Node>,
    /// Entry point for locally generated RTCP (RR, NACK, TCC feedback):
    /// skips classification, feeds straight into RTCP encode + encrypt.
    pub rtcp_entry: Arc<dyn Node>,
    pub outgoing: Receiver<Bytes>,
    pub dropped_queue_full: Arc<AtomicU64>,
}

/// `OutgoingAudioFormatter` / `OutgoingVideoFormatter`: hook point for
/// codec-specific outgoing logic (padding insertion, probe packets). Left
/// as a pass-through — the bandwidth estimator that would drive probing is
/// out of scope (§1 Non-goals), so there is nothing to schedule yet.
#[must_use]
pub fn outgoing_format_pass_through(info: PacketInfo) -> Option<PacketInfo> {
    Some(info)
}

/// `RTCPEncoder`: packs one parsed RTCP element into its wire bytes. This
/// engine always emits one element per datagram rather than bundling
/// several into a single compound packet.
#[must_use]
pub fn rtcp_encoder_transform(mut info: PacketInfo) -> Option<PacketInfo> {
    match &info.kind {
        PacketKind::RtcpElement(packet) => {
            let encoded = encode_packet(packet);
            info.kind = PacketKind::Srtcp(encoded);
            Some(info)
        }
        _ => None,
    }
}

/// `SRTPEncrypt`: the send-side mirror of `SRTPDecrypt`. Encrypts the whole
/// wire packet via the installed transformer; drops if none is installed
/// yet or the transform itself fails.
#[must_use]
pub fn srtp_encrypt_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| {
        let packet = packet_of(&info.kind)?;
        let ciphertext = state.send_transformer().transform(packet.raw().clone())?;
        info.kind = PacketKind::Srtp(ciphertext);
        Some(info)
    }
}

/// `SRTCPEncrypt`: same shape for the RTCP branch. Consumes the plaintext
/// compound buffer `RTCPEncoder` produced.
#[must_use]
pub fn srtcp_encrypt_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| match &info.kind {
        PacketKind::Srtcp(buf) => {
            let ciphertext = state.send_transformer().transform(buf.clone())?;
            info.kind = PacketKind::Srtcp(ciphertext);
            Some(info)
        }
        _ => None,
    }
}

/// `OutgoingQueue`: terminal node. Non-blocking put into the bounded
/// outgoing queue; on a full queue it drops and counts rather than
/// stalling the send pipeline thread (§5).
#[must_use]
pub fn outgoing_queue_transform(
    sender: SyncSender<Bytes>,
    dropped: Arc<AtomicU64>,
) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| {
        let bytes = match &info.kind {
            PacketKind::Srtp(b) | PacketKind::Srtcp(b) => b.clone(),
            _ => return None,
        };
        match sender.try_send(bytes) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(node = "OutgoingQueue", "outgoing queue full, packet dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(node = "OutgoingQueue", "outgoing queue receiver gone, packet dropped");
            }
        }
        None
    }
}

#[must_use]
pub fn build(state: Arc<TransceiverState>, config: &TransceiverConfig) -> SendPipeline {
    let (tx, rx) = sync_channel::<Bytes>(config.outgoing_queue_capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let tx_rtcp = tx.clone();
    let dropped_rtcp = dropped.clone();
    let state_rtcp = state.clone();
    let rtcp_entry = PipelineBuilder::new()
        .simple_node("RTCPEncoder", rtcp_encoder_transform)
        .simple_node("SRTCPEncrypt", srtcp_encrypt_transform(state_rtcp))
        .simple_node("OutgoingQueue", outgoing_queue_transform(tx_rtcp, dropped_rtcp))
        .build();

    let tx_audio = tx.clone();
    let dropped_audio = dropped.clone();
    let state_audio = state.clone();
    let tx_video = tx.clone();
    let dropped_video = dropped.clone();
    let state_video = state.clone();
    let rtcp_branch = rtcp_entry.clone();

    let root = PipelineBuilder::new()
        .demux("Outgoing classify", move |d| {
            d.path(
                "audio",
                |p| matches!(p.kind, PacketKind::Audio(_)),
                move |b| {
                    b.simple_node("OutgoingAudioFormatter", outgoing_format_pass_through)
                        .simple_node("SRTPEncrypt", srtp_encrypt_transform(state_audio))
                        .simple_node("OutgoingQueue", outgoing_queue_transform(tx_audio, dropped_audio))
                },
            )
            .path(
                "video",
                |p| matches!(p.kind, PacketKind::Video(_)),
                move |b| {
                    b.simple_node("OutgoingVideoFormatter", outgoing_format_pass_through)
                        .simple_node("SRTPEncrypt", srtp_encrypt_transform(state_video))
                        .simple_node("OutgoingQueue", outgoing_queue_transform(tx_video, dropped_video))
                },
            )
            .path(
                "rtcp",
                |p| matches!(p.kind, PacketKind::RtcpElement(_)),
                move |b| b.node(rtcp_branch),
            )
        })
        .build();

    SendPipeline {
        root,
        rtcp_entry,
        outgoing: rx,
        dropped_queue_full: dropped,
    }
}

/// Wraps a send pipeline's RTCP entry point as an [`RtcpSender`] callback,
/// for the TCC generator and retransmission tracker to feed locally
/// generated feedback/NACK packets into without touching the queue or
/// channel directly.
#[must_use]
pub fn make_rtcp_sender(rtcp_entry: Arc<dyn Node>) -> RtcpSender {
    Arc::new(move |packet: RtcpPacket| {
        rtcp_entry.process_packets(vec![PacketInfo::new(PacketKind::RtcpElement(packet), Instant::now())]);
    })
}
