//! Concrete nodes of the receive pipeline (§4.4). Stateless or
//! single-packet-in/single-packet-out steps are built from
//! `sfu_core::SimpleNode` closures, following the builder DSL's
//! `simple_node(name, fn)` idiom; steps that fan out (`CompoundRTCPSplitter`)
//! or need a callback slot other code rebinds live on (`HandlerWrapperNode`)
//! are their own `Node` impls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::Mutex;

use sfu_core::{Node, NodeCore, PacketInfo, PacketKind, VideoFrameMeta, VideoRtpPacket};
use sfu_rtcp::{parse_packet, split_compound, NtpTime, RtcpPacket};
use sfu_rtp::extensions::{parse_elements, read_audio_level, read_tcc_sequence, ONE_BYTE_PROFILE};
use sfu_rtp::{parse_rtp, RtpHeader, RtpPacket, RtpPacketBuilder};

use crate::callback::{AudioLevelListener, PacketHandler};
use crate::nack::RetransmissionTracker;
use crate::rtcp_notifier::RtcpEventNotifier;
use crate::state::TransceiverState;
use crate::stat_tracker::IncomingStatsTable;
use crate::tcc::TransportCcGenerator;
use crate::transform::Vp8Depacketizer;

pub const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const TRANSPORT_CC_URI: &str = "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";

pub(crate) fn header_of(kind: &PacketKind) -> Option<&RtpHeader> {
    match kind {
        PacketKind::Rtp(p) | PacketKind::Audio(p) => Some(p.header()),
        PacketKind::Video(v) => Some(v.packet.header()),
        _ => None,
    }
}

pub(crate) fn packet_of(kind: &PacketKind) -> Option<&RtpPacket> {
    match kind {
        PacketKind::Rtp(p) | PacketKind::Audio(p) => Some(p),
        PacketKind::Video(v) => Some(&v.packet),
        _ => None,
    }
}

/// Shortest buffer either wire format's common header could occupy (the
/// 4-byte RTCP common header); the RTP-specific 12-byte minimum is enforced
/// later, once the RTP/RTCP demux has routed the packet.
const MIN_PROTOCOL_LEN: usize = 4;

/// `RootParser`: labels a raw socket buffer as the SRTP wire protocol,
/// dropping anything too short to hold even a minimal RTP/RTCP header.
#[must_use]
pub fn root_parser_transform(mut info: PacketInfo) -> Option<PacketInfo> {
    match &info.kind {
        PacketKind::Raw(buf) if buf.len() >= MIN_PROTOCOL_LEN => {
            let buf = buf.clone();
            info.kind = PacketKind::SrtpProtocol(buf);
            Some(info)
        }
        _ => None,
    }
}

/// RFC 5761 §4 static-payload-type heuristic distinguishing a multiplexed
/// RTP/RTCP buffer by its second byte: RTCP payload types live in 192..=223.
#[must_use]
pub fn looks_like_rtcp(info: &PacketInfo) -> bool {
    match &info.kind {
        PacketKind::SrtpProtocol(buf) => buf.len() >= 2 && (192..=223).contains(&(buf[1] & 0x7f)),
        _ => false,
    }
}

#[must_use]
pub fn looks_like_rtp(info: &PacketInfo) -> bool {
    matches!(&info.kind, PacketKind::SrtpProtocol(_)) && !looks_like_rtcp(info)
}

/// `SRTPParser`: reinterprets a buffer already routed to the RTP branch.
/// Only a relabeling — the payload stays ciphertext until `SRTPDecrypt`.
#[must_use]
pub fn srtp_parser_transform(mut info: PacketInfo) -> Option<PacketInfo> {
    match &info.kind {
        PacketKind::SrtpProtocol(buf) => {
            let buf = buf.clone();
            info.kind = PacketKind::Srtp(buf);
            Some(info)
        }
        _ => None,
    }
}

/// `SRTCPParser`: same relabeling for the RTCP branch.
#[must_use]
pub fn srtcp_parser_transform(mut info: PacketInfo) -> Option<PacketInfo> {
    match &info.kind {
        PacketKind::SrtpProtocol(buf) => {
            let buf = buf.clone();
            info.kind = PacketKind::Srtcp(buf);
            Some(info)
        }
        _ => None,
    }
}

/// `PayloadTypeFilter`: SRTP leaves RTP headers in the clear (RFC 3711), so
/// the payload type can be read before decryption. Drops packets whose type
/// isn't in the transceiver's payload-type table.
#[must_use]
pub fn payload_type_filter_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| match &info.kind {
        PacketKind::Srtp(buf) => {
            let header = parse_rtp(buf.clone()).ok()?;
            if state.payload_type_format(header.header().payload_type).is_some() {
                Some(info)
            } else {
                tracing::debug!(node = "PayloadTypeFilter", pt = header.header().payload_type, "dropped unknown payload type");
                None
            }
        }
        _ => None,
    }
}

/// `TCCGenerator`: reads the transport-wide-cc sequence number from the
/// header extension (still readable pre-decrypt) and records an arrival
/// observation; never drops.
#[must_use]
pub fn tcc_generator_transform(
    state: Arc<TransceiverState>,
    generator: Arc<TransportCcGenerator>,
) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| {
        if let PacketKind::Srtp(buf) = &info.kind {
            if let Some(id) = state.extension_id_for(TRANSPORT_CC_URI) {
                if let Ok(packet) = parse_rtp(buf.clone()) {
                    if let Some(ext) = packet.extension() {
                        for element in parse_elements(ext.profile, &ext.data) {
                            if element.id == id {
                                if let Some(seq) = read_tcc_sequence(&element) {
                                    generator.observe(seq, Instant::now());
                                }
                            }
                        }
                    }
                }
            }
        }
        Some(info)
    }
}

/// `SRTPDecrypt`: hands the whole ciphertext packet to the installed
/// transformer and re-parses the plaintext it returns. Drops on auth
/// failure or a missing transformer (expected transiently mid-handshake).
#[must_use]
pub fn srtp_decrypt_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| match &info.kind {
        PacketKind::Srtp(buf) => {
            let plaintext = state.recv_transformer().reverse_transform(buf.clone())?;
            let packet = parse_rtp(plaintext).ok()?;
            info.kind = PacketKind::Rtp(packet);
            Some(info)
        }
        _ => None,
    }
}

/// `SRTCPDecrypt`: same shape for the RTCP branch.
#[must_use]
pub fn srtcp_decrypt_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| match &info.kind {
        PacketKind::Srtcp(buf) => {
            let plaintext = state.recv_transformer().reverse_transform(buf.clone())?;
            info.kind = PacketKind::Srtcp(plaintext);
            Some(info)
        }
        _ => None,
    }
}

/// `PreParseSnapshot`: keeps the last `capacity` decrypted RTCP buffers
/// around for post-mortem logging if a later parse step fails. Forwards
/// every packet unchanged.
#[must_use]
pub fn pre_parse_snapshot_transform(capacity: usize) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    let ring: Mutex<VecDeque<Bytes>> = Mutex::new(VecDeque::with_capacity(capacity));
    move |info| {
        if let PacketKind::Srtcp(buf) = &info.kind {
            let mut ring = ring.lock();
            if ring.len() == capacity {
                ring.pop_front();
            }
            ring.push_back(buf.clone());
        }
        Some(info)
    }
}

/// `RTCPParser`: splits the compound datagram and parses every element,
/// bundling the results into one `PacketInfo` (the fan-out into separate
/// `PacketInfo`s per element is `CompoundRtcpSplitterNode`'s job). On a
/// malformed compound buffer, emits nothing — the `PreParseSnapshot` ring
/// upstream is the diagnostic trail.
#[must_use]
pub fn rtcp_parser_transform(mut info: PacketInfo) -> Option<PacketInfo> {
    match &info.kind {
        PacketKind::Srtcp(buf) => {
            let elements = split_compound(buf).ok()?;
            let mut parsed = Vec::with_capacity(elements.len());
            for element in elements {
                match parse_packet(element) {
                    Ok(pkt) => parsed.push(pkt),
                    Err(err) => {
                        tracing::debug!(node = "RTCPParser", error = %err, "dropped malformed compound element");
                        return None;
                    }
                }
            }
            info.kind = PacketKind::Rtcp(parsed);
            Some(info)
        }
        _ => None,
    }
}

/// `CompoundRTCPSplitter` (C8): turns one bundled `Rtcp(Vec<RtcpPacket>)`
/// into N sibling `PacketInfo`s, each carrying one `RtcpElement`, the
/// original receive time, and a cloned timeline prefix.
pub struct CompoundRtcpSplitterNode {
    core: NodeCore,
}

impl CompoundRtcpSplitterNode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { core: NodeCore::new(name) }
    }
}

impl Node for CompoundRtcpSplitterNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
        let mut out = Vec::new();
        for info in batch {
            if let PacketKind::Rtcp(elements) = &info.kind {
                for element in elements {
                    out.push(info.fork(PacketKind::RtcpElement(element.clone())));
                }
            }
        }
        out
    }
}

/// `RTCPTermination`: publishes locally relevant RTCP (SR/RR/NACK/TCC/
/// REMB/PLI/FIR) to the notifier and consumes it; forwards SDES/BYE
/// downstream to `rtcpHandlerWrapper` since this engine doesn't act on them.
/// A Sender Report also updates `stats` directly, so the LSR/DLSR this
/// engine later echoes back in its own Receiver Reports reflect the SR that
/// arrived, not a permanently-absent one.
#[must_use]
pub fn rtcp_termination_transform(
    notifier: Arc<RtcpEventNotifier>,
    stats: Arc<IncomingStatsTable>,
) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| match &info.kind {
        PacketKind::RtcpElement(packet) => match packet {
            RtcpPacket::SourceDescription(_) | RtcpPacket::Goodbye(_) => Some(info),
            RtcpPacket::SenderReport(sr) => {
                stats.note_sender_report(sr.sender_ssrc, NtpTime::from_u64(sr.sender_info.ntp_timestamp), Instant::now());
                notifier.publish(packet);
                None
            }
            _ => {
                notifier.publish(packet);
                None
            }
        },
        _ => None,
    }
}

/// `MediaTypeParser`: reinterprets a decrypted RTP packet as audio or video
/// using the payload-type table; unknown payload types are dropped (they
/// already passed `PayloadTypeFilter`, so this should not normally happen —
/// defends against a table mutation racing between the two nodes).
#[must_use]
pub fn media_type_parser_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| match info.kind {
        PacketKind::Rtp(packet) => match state.payload_type_format(packet.header().payload_type) {
            Some(sfu_core::MediaFormat::Audio) => {
                info.kind = PacketKind::Audio(packet);
                Some(info)
            }
            Some(sfu_core::MediaFormat::Video) => {
                info.kind = PacketKind::Video(VideoRtpPacket { packet, meta: VideoFrameMeta::default() });
                Some(info)
            }
            None => None,
        },
        _ => None,
    }
}

/// Default RTP clock rates for the two media kinds this engine classifies.
/// A real deployment negotiates per-codec clock rates over SDP; this engine
/// has no SDP layer (Non-goal), so `StatTracker` uses the conventional
/// static values (RFC 3551 §6 for audio, the common 90kHz video clock).
const AUDIO_CLOCK_RATE: u32 = 48_000;
const VIDEO_CLOCK_RATE: u32 = 90_000;

/// `StatTracker`: feeds per-SSRC reception statistics from every audio/video
/// packet that reaches it. Runs after `MediaTypeParser`, so the clock rate
/// to use is implied by which variant the packet already carries.
#[must_use]
pub fn stat_tracker_transform(stats: Arc<IncomingStatsTable>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| {
        let clock_rate = match &info.kind {
            PacketKind::Audio(_) => AUDIO_CLOCK_RATE,
            PacketKind::Video(_) => VIDEO_CLOCK_RATE,
            _ => return Some(info),
        };
        if let Some(packet) = packet_of(&info.kind) {
            let header = packet.header();
            stats.record(header.ssrc, header.sequence_number, header.timestamp, Instant::now(), clock_rate);
        }
        Some(info)
    }
}

/// `AudioLevelReader`: extracts the client-to-mixer audio level extension
/// (RFC 6464) and pushes it to the installed listener. Never drops.
#[must_use]
pub fn audio_level_reader_transform(
    state: Arc<TransceiverState>,
    listener: Option<AudioLevelListener>,
) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| {
        if let (Some(listener), Some(packet)) = (&listener, packet_of(&info.kind)) {
            if let (Some(id), Some(ext)) = (state.extension_id_for(AUDIO_LEVEL_URI), packet.extension()) {
                for element in parse_elements(ext.profile, &ext.data) {
                    if element.id == id {
                        if let Some((voice_activity, level)) = read_audio_level(&element) {
                            listener(packet.header().ssrc, voice_activity, level);
                        }
                    }
                }
            }
        }
        Some(info)
    }
}

/// `RtxHandler`: for a packet on an SSRC associated "FID" (RTX) with a
/// primary, rewrites SSRC and sequence number to the primary stream using
/// the original sequence number (OSN) carried in the first two payload
/// bytes (RFC 4588 §4).
#[must_use]
pub fn rtx_handler_transform(state: Arc<TransceiverState>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| match info.kind {
        PacketKind::Video(video) => {
            let Some(primary_ssrc) = state.rtx_primary_of(video.packet.header().ssrc) else {
                info.kind = PacketKind::Video(video);
                return Some(info);
            };
            let payload = video.packet.payload();
            if payload.len() < 2 {
                return None;
            }
            let osn = u16::from_be_bytes([payload[0], payload[1]]);
            let mut header = video.packet.header().clone();
            header.ssrc = primary_ssrc;
            header.sequence_number = osn;

            let mut builder = RtpPacketBuilder::new(header).payload(payload.slice(2..));
            if let Some(ext) = video.packet.extension() {
                builder = builder.extension_bytes(ext.profile, ext.data).ok()?;
            }
            if video.packet.padding_len() > 0 {
                builder = builder.padding(video.packet.padding_len());
            }
            let rewritten = parse_rtp(builder.encode().ok()?).ok()?;
            info.kind = PacketKind::Video(VideoRtpPacket { packet: rewritten, meta: video.meta });
            Some(info)
        }
        _ => None,
    }
}

/// `PaddingTermination`: drops padding-only packets used purely for
/// bandwidth probing (no real media payload once padding is accounted for).
#[must_use]
pub fn padding_termination_transform(info: PacketInfo) -> Option<PacketInfo> {
    match packet_of(&info.kind) {
        Some(packet) if packet.header().padding && packet.payload().is_empty() => None,
        _ => Some(info),
    }
}

/// `VideoParser`: attaches keyframe/temporal/spatial metadata derived from
/// the VP8 payload descriptor. This engine's depacketizer interface
/// (§6) only exposes keyframe detection; temporal/spatial layer ids are left
/// unset pending a richer external utility.
#[must_use]
pub fn video_parser_transform(depacketizer: Arc<dyn Vp8Depacketizer>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |mut info| match info.kind {
        PacketKind::Video(mut video) => {
            let payload = video.packet.payload();
            video.meta.is_keyframe = depacketizer.is_key_frame(&payload);
            info.kind = PacketKind::Video(video);
            Some(info)
        }
        _ => None,
    }
}

/// `RetransmissionRequester`: observes every received sequence number,
/// forwarding packets unchanged; gap detection and NACK emission live in
/// [`RetransmissionTracker`], shared with the background scheduler's
/// periodic `flush_expired` call.
#[must_use]
pub fn retransmission_requester_transform(tracker: Arc<RetransmissionTracker>) -> impl Fn(PacketInfo) -> Option<PacketInfo> {
    move |info| {
        if let Some(packet) = packet_of(&info.kind) {
            tracker.record(packet.header().ssrc, packet.header().sequence_number, Instant::now());
        }
        Some(info)
    }
}

/// Terminal node installed at the end of a receive subgraph
/// (`rtpPacketHandler` / `rtcpHandlerWrapper`, §9 "pluggable handler
/// slots"). The handler slot is a shared `ArcSwapOption` so the owning
/// `Transceiver` can rebind it from the control thread without touching the
/// graph.
pub struct HandlerWrapperNode {
    core: NodeCore,
    handler: Arc<ArcSwapOption<PacketHandler>>,
    dropped_no_handler: AtomicU64,
}

impl HandlerWrapperNode {
    #[must_use]
    pub fn new(name: impl Into<String>, handler: Arc<ArcSwapOption<PacketHandler>>) -> Self {
        Self {
            core: NodeCore::new(name),
            handler,
            dropped_no_handler: AtomicU64::new(0),
        }
    }
}

impl Node for HandlerWrapperNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
        match self.handler.load_full() {
            Some(handler) => handler(&batch),
            None => {
                self.dropped_no_handler.fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_core::{AssociationKind, MediaFormat};

    fn info(kind: PacketKind) -> PacketInfo {
        PacketInfo::new(kind, Instant::now())
    }

    #[test]
    fn root_parser_drops_undersized_buffers() {
        let short = info(PacketKind::Raw(Bytes::from_static(b"x")));
        assert!(root_parser_transform(short).is_none());
    }

    #[test]
    fn rtcp_heuristic_matches_payload_type_range() {
        let mut rtcp_like = [0u8; 12];
        rtcp_like[1] = 200; // sender report PT
        let packet = info(PacketKind::SrtpProtocol(Bytes::copy_from_slice(&rtcp_like)));
        assert!(looks_like_rtcp(&packet));
        assert!(!looks_like_rtp(&packet));
    }

    #[test]
    fn payload_type_filter_drops_unknown_types() {
        let state = Arc::new(TransceiverState::new());
        state.add_payload_type(111, MediaFormat::Audio);
        let filter = payload_type_filter_transform(state);

        let header = RtpHeader { payload_type: 111, ..RtpHeader::default() };
        let known = RtpPacketBuilder::new(header).payload(Bytes::new()).encode().unwrap();
        let unknown_header = RtpHeader { payload_type: 77, ..RtpHeader::default() };
        let unknown = RtpPacketBuilder::new(unknown_header).payload(Bytes::new()).encode().unwrap();

        assert!(filter(info(PacketKind::Srtp(known))).is_some());
        assert!(filter(info(PacketKind::Srtp(unknown))).is_none());
    }

    #[test]
    fn rtx_handler_rewrites_ssrc_and_restores_original_sequence() {
        let state = Arc::new(TransceiverState::new());
        state.add_association(0xAAAA, 0xBBBB, AssociationKind::Fid);
        let handler = rtx_handler_transform(state);

        let header = RtpHeader { ssrc: 0xBBBB, sequence_number: 999, payload_type: 96, ..RtpHeader::default() };
        let mut payload = vec![0x30, 0x39]; // OSN 12345
        payload.extend_from_slice(b"vp8-bytes");
        let packet = parse_rtp(RtpPacketBuilder::new(header).payload(Bytes::from(payload)).encode().unwrap()).unwrap();

        let out = handler(info(PacketKind::Video(VideoRtpPacket { packet, meta: VideoFrameMeta::default() })))
            .expect("rtx packet rewritten");
        match out.kind {
            PacketKind::Video(v) => {
                assert_eq!(v.packet.header().ssrc, 0xAAAA);
                assert_eq!(v.packet.header().sequence_number, 12345);
                assert_eq!(v.packet.payload(), Bytes::from_static(b"vp8-bytes"));
            }
            _ => panic!("expected video packet"),
        }
    }

    #[test]
    fn compound_splitter_forks_one_packet_info_per_element() {
        let node = CompoundRtcpSplitterNode::new("splitter");
        let bye = RtcpPacket::Goodbye(sfu_rtcp::Goodbye { sources: vec![1], reason: None });
        let elements = vec![bye.clone(), bye];
        let out = node.do_process(vec![info(PacketKind::Rtcp(elements))]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|p| matches!(p.kind, PacketKind::RtcpElement(_))));
    }

    #[test]
    fn sender_report_updates_stats_table() {
        let notifier = Arc::new(RtcpEventNotifier::new());
        let stats = Arc::new(IncomingStatsTable::new());
        stats.record(0xD, 1, 1000, Instant::now(), 8000);
        let transform = rtcp_termination_transform(notifier, stats.clone());

        let sr = RtcpPacket::SenderReport(sfu_rtcp::SenderReport {
            sender_ssrc: 0xD,
            sender_info: sfu_rtcp::SenderInfo {
                ntp_timestamp: sfu_rtcp::NtpTime::from_parts(3_000_000_000, 0).as_u64(),
                rtp_timestamp: 1000,
                sender_packet_count: 1,
                sender_octet_count: 100,
            },
            reports: Vec::new(),
            profile_extensions: Vec::new(),
        });
        assert!(transform(info(PacketKind::RtcpElement(sr))).is_none());

        let snapshot = stats.snapshot_all(Instant::now());
        let entry = snapshot.iter().find(|s| s.source_ssrc == 0xD).unwrap();
        assert!(entry.last_sr.is_some());
        assert!(entry.delay_since_last_sr.is_some());
    }

    #[test]
    fn handler_wrapper_drops_silently_with_no_handler_installed() {
        let slot: Arc<ArcSwapOption<PacketHandler>> = Arc::new(ArcSwapOption::empty());
        let node = HandlerWrapperNode::new("wrapper", slot);
        let out = node.do_process(vec![info(PacketKind::Raw(Bytes::from_static(b"x")))]);
        assert!(out.is_empty());
        assert_eq!(node.dropped_no_handler.load(Ordering::Relaxed), 1);
    }
}
