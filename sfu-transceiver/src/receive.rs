//! Assembles the receive pipeline topology (C6, §4.4).

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use sfu_core::{into_linked_arc, Node, PacketKind, PipelineBuilder};

use crate::callback::{AudioLevelListener, PacketHandler, RtcpSender};
use crate::config::TransceiverConfig;
use crate::nack::RetransmissionTracker;
use crate::nodes::{self, CompoundRtcpSplitterNode, HandlerWrapperNode};
use crate::rtcp_notifier::RtcpEventNotifier;
use crate::state::TransceiverState;
use crate::stat_tracker::IncomingStatsTable;
use crate::tcc::TransportCcGenerator;
use crate::transform::Vp8Depacketizer;

/// Shared handles into a built receive pipeline: the root to feed packets
/// into, and the slots/tables the owning transceiver needs to read or
/// rebind without walking the graph.
pub struct ReceivePipeline {
    pub root: Arc<dyn Node>,
    pub rtp_handler: Arc<ArcSwapOption<PacketHandler>>,
    pub rtcp_handler: Arc<ArcSwapOption<PacketHandler>>,
    pub stats: Arc<IncomingStatsTable>,
    pub tcc_generator: Arc<TransportCcGenerator>,
    pub retransmission_tracker: Arc<RetransmissionTracker>,
}

#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn build(
    state: Arc<TransceiverState>,
    config: &TransceiverConfig,
    notifier: Arc<RtcpEventNotifier>,
    rtcp_sender: RtcpSender,
    vp8: Arc<dyn Vp8Depacketizer>,
    audio_level_listener: Option<AudioLevelListener>,
    sender_ssrc: u32,
) -> ReceivePipeline {
    let stats = Arc::new(IncomingStatsTable::new());
    let tcc_generator = Arc::new(TransportCcGenerator::new(sender_ssrc, 0, rtcp_sender.clone()));
    let retransmission_tracker = Arc::new(RetransmissionTracker::new(sender_ssrc, config.nack_delay, rtcp_sender));
    let rtp_handler: Arc<ArcSwapOption<PacketHandler>> = Arc::new(ArcSwapOption::empty());
    let rtcp_handler: Arc<ArcSwapOption<PacketHandler>> = Arc::new(ArcSwapOption::empty());

    let rtp_wrapper = into_linked_arc(HandlerWrapperNode::new("rtpPacketHandler", rtp_handler.clone()));
    let rtcp_wrapper = into_linked_arc(HandlerWrapperNode::new("rtcpHandlerWrapper", rtcp_handler.clone()));

    let state_for_rtp = state.clone();
    let state_for_tcc = state.clone();
    let state_for_decrypt = state.clone();
    let state_for_media_type = state.clone();
    let state_for_audio = state.clone();
    let state_for_rtx = state.clone();
    let state_for_srtcp_decrypt = state.clone();
    let stats_for_tracker = stats.clone();
    let stats_for_rtcp_termination = stats.clone();
    let tcc_for_node = tcc_generator.clone();
    let retransmission_for_node = retransmission_tracker.clone();
    let notifier_for_node = notifier;
    let rtp_wrapper_for_audio = rtp_wrapper.clone();
    let rtp_wrapper_for_video = rtp_wrapper;

    let root = PipelineBuilder::new()
        .simple_node("RootParser", nodes::root_parser_transform)
        .demux("SRTP/SRTCP", move |d| {
            d.path("rtp", nodes::looks_like_rtp, move |b| {
                b.simple_node("SRTPParser", nodes::srtp_parser_transform)
                    .simple_node("PayloadTypeFilter", nodes::payload_type_filter_transform(state_for_rtp))
                    .simple_node("TCCGenerator", nodes::tcc_generator_transform(state_for_tcc, tcc_for_node))
                    .simple_node("SRTPDecrypt", nodes::srtp_decrypt_transform(state_for_decrypt))
                    .simple_node("MediaTypeParser", nodes::media_type_parser_transform(state_for_media_type))
                    .simple_node("StatTracker", nodes::stat_tracker_transform(stats_for_tracker))
                    .demux("Media type", move |d2| {
                        d2.path(
                            "audio",
                            |p| matches!(p.kind, PacketKind::Audio(_)),
                            move |b2| {
                                b2.simple_node(
                                    "AudioLevelReader",
                                    nodes::audio_level_reader_transform(state_for_audio, audio_level_listener),
                                )
                                .node(rtp_wrapper_for_audio)
                            },
                        )
                        .path(
                            "video",
                            |p| matches!(p.kind, PacketKind::Video(_)),
                            move |b2| {
                                b2.simple_node("RtxHandler", nodes::rtx_handler_transform(state_for_rtx))
                                    .simple_node("PaddingTermination", nodes::padding_termination_transform)
                                    .simple_node("VideoParser", nodes::video_parser_transform(vp8))
                                    .simple_node(
                                        "RetransmissionRequester",
                                        nodes::retransmission_requester_transform(retransmission_for_node),
                                    )
                                    .node(rtp_wrapper_for_video)
                            },
                        )
                    })
            })
            .path("rtcp", nodes::looks_like_rtcp, move |b| {
                b.simple_node("SRTCPParser", nodes::srtcp_parser_transform)
                    .simple_node("SRTCPDecrypt", nodes::srtcp_decrypt_transform(state_for_srtcp_decrypt))
                    .simple_node("PreParseSnapshot", nodes::pre_parse_snapshot_transform(32))
                    .simple_node("RTCPParser", nodes::rtcp_parser_transform)
                    .node(into_linked_arc(CompoundRtcpSplitterNode::new("CompoundRTCPSplitter")))
                    .simple_node(
                        "RTCPTermination",
                        nodes::rtcp_termination_transform(notifier_for_node, stats_for_rtcp_termination),
                    )
                    .node(rtcp_wrapper)
            })
        })
        .build();

    ReceivePipeline {
        root,
        rtp_handler,
        rtcp_handler,
        stats,
        tcc_generator,
        retransmission_tracker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sfu_core::{MediaFormat, PacketInfo};
    use sfu_rtp::{RtpHeader, RtpPacketBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    struct NoopVp8;
    impl Vp8Depacketizer for NoopVp8 {
        fn is_key_frame(&self, _payload: &Bytes) -> bool {
            false
        }
        fn is_start_of_frame(&self, _payload: &Bytes) -> bool {
            false
        }
        fn payload_descriptor_size(&self, _payload: &Bytes) -> usize {
            0
        }
    }

    fn build_test_pipeline(state: Arc<TransceiverState>) -> ReceivePipeline {
        build(
            state,
            &TransceiverConfig::default(),
            Arc::new(RtcpEventNotifier::new()),
            Arc::new(|_pkt| {}),
            Arc::new(NoopVp8),
            None,
            0xF00D,
        )
    }

    #[test]
    fn audio_happy_path_reaches_rtp_handler() {
        let state = Arc::new(TransceiverState::new());
        state.add_payload_type(111, MediaFormat::Audio);
        let pipeline = build_test_pipeline(state);

        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        pipeline.rtp_handler.store(Some(Arc::new(move |batch: &[PacketInfo]| {
            received2.lock().unwrap().extend(batch.iter().map(|p| p.kind.label().to_string()));
        })));

        let header = RtpHeader { payload_type: 111, sequence_number: 100, ssrc: 0xA, ..RtpHeader::default() };
        let wire = RtpPacketBuilder::new(header).payload(Bytes::from_static(b"opus")).encode().unwrap();

        pipeline.root.process_packets(vec![PacketInfo::new(PacketKind::Raw(wire), Instant::now())]);

        assert_eq!(*received.lock().unwrap(), vec!["audio-rtp".to_string()]);
        assert_eq!(pipeline.stats.packets_received(0xA), Some(1));
    }

    #[test]
    fn unknown_payload_type_is_dropped_before_the_handler() {
        let state = Arc::new(TransceiverState::new());
        let pipeline = build_test_pipeline(state);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        pipeline.rtp_handler.store(Some(Arc::new(move |_: &[PacketInfo]| {
            hits2.fetch_add(1, Ordering::Relaxed);
        })));

        let header = RtpHeader { payload_type: 77, sequence_number: 1, ssrc: 0xB, ..RtpHeader::default() };
        let wire = RtpPacketBuilder::new(header).payload(Bytes::from_static(b"x")).encode().unwrap();
        pipeline.root.process_packets(vec![PacketInfo::new(PacketKind::Raw(wire), Instant::now())]);

        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn rtcp_buffer_is_routed_to_the_rtcp_handler() {
        let state = Arc::new(TransceiverState::new());
        let pipeline = build_test_pipeline(state);

        let received = Arc::new(Mutex::new(0usize));
        let received2 = received.clone();
        pipeline.rtcp_handler.store(Some(Arc::new(move |batch: &[PacketInfo]| {
            *received2.lock().unwrap() += batch.len();
        })));

        let bye = sfu_rtcp::RtcpPacket::Goodbye(sfu_rtcp::Goodbye { sources: vec![0xC], reason: None });
        let wire = sfu_rtcp::encode_packet(&bye);
        pipeline.root.process_packets(vec![PacketInfo::new(PacketKind::Raw(wire), Instant::now())]);

        assert_eq!(*received.lock().unwrap(), 1);
    }
}
