//! The `Transceiver` object (C9, §4.7): the public API surface plus the
//! worker-thread model of §5 — one dedicated OS thread per direction, each
//! suspending only on its bounded queue's `recv_timeout`, and a background
//! scheduler thread driving periodic RR generation, NACK expiry, and TCC
//! feedback flush.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::Mutex;

use sfu_core::{broadcast_event, AssociationKind, Event, MediaFormat, Node, PacketInfo, PacketKind};
use sfu_rtcp::{build_rr, ReceiverStatistics, RtcpPacket};

use crate::callback::{AudioLevelListener, PacketHandler};
use crate::config::TransceiverConfig;
use crate::error::TransceiverError;
use crate::nack::RetransmissionTracker;
use crate::receive::{self, ReceivePipeline};
use crate::rtcp_notifier::RtcpEventNotifier;
use crate::rtt::ConnectionStats;
use crate::send::{self, SendPipeline};
use crate::stat_tracker::IncomingStatsTable;
use crate::state::TransceiverState;
use crate::tcc::{self, BandwidthEstimatorSink, TransportCcGenerator};
use crate::transform::{DtlsContext, SrtpProfile, SrtpTransformerFactory, Vp8Depacketizer};

/// Background scheduler tick. Short enough to keep NACK/TCC cadence close
/// to their configured intervals and to bound `stop()`'s contribution from
/// this thread to a few milliseconds.
const SCHEDULER_TICK: Duration = Duration::from_millis(10);

/// One SFU-side RTP/RTCP endpoint: owns a receive pipeline, a send
/// pipeline, the queues feeding them, and the worker threads that drive
/// both plus the background scheduler.
pub struct Transceiver {
    state: Arc<TransceiverState>,
    receive_root: Arc<dyn Node>,
    send_root: Arc<dyn Node>,
    rtp_handler: Arc<ArcSwapOption<PacketHandler>>,
    rtcp_handler: Arc<ArcSwapOption<PacketHandler>>,
    srtp_factory: Arc<dyn SrtpTransformerFactory>,
    incoming_tx: SyncSender<PacketInfo>,
    outgoing_app_tx: SyncSender<PacketInfo>,
    outgoing_queue: Mutex<Receiver<Bytes>>,
    dropped_incoming_full: AtomicU64,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: TransceiverConfig,
    connection_stats: Arc<ConnectionStats>,
}

impl Transceiver {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TransceiverConfig,
        sender_ssrc: u32,
        vp8: Arc<dyn Vp8Depacketizer>,
        audio_level_listener: Option<AudioLevelListener>,
        srtp_factory: Arc<dyn SrtpTransformerFactory>,
        bandwidth_sink: Option<Arc<dyn BandwidthEstimatorSink>>,
    ) -> Transceiver {
        let state = Arc::new(TransceiverState::new());
        let notifier = Arc::new(RtcpEventNotifier::new());
        let connection_stats = Arc::new(ConnectionStats::new());
        notifier.subscribe(connection_stats.subscriber());
        if let Some(sink) = bandwidth_sink {
            notifier.subscribe(tcc::bandwidth_estimator_subscriber(sink));
        }

        let send_pipeline: SendPipeline = send::build(state.clone(), &config);
        let rtcp_sender = send::make_rtcp_sender(send_pipeline.rtcp_entry.clone());

        let receive_pipeline: ReceivePipeline = receive::build(
            state.clone(),
            &config,
            notifier.clone(),
            rtcp_sender.clone(),
            vp8,
            audio_level_listener,
            sender_ssrc,
        );

        let (incoming_tx, incoming_rx) = sync_channel::<PacketInfo>(config.incoming_queue_capacity);
        let (outgoing_app_tx, outgoing_app_rx) = sync_channel::<PacketInfo>(config.outgoing_queue_capacity);

        let running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::with_capacity(3);

        workers.push(spawn_receiver_worker(
            receive_pipeline.root.clone(),
            incoming_rx,
            running.clone(),
            config.worker_poll_timeout,
        ));
        workers.push(spawn_sender_worker(
            send_pipeline.root.clone(),
            outgoing_app_rx,
            running.clone(),
            config.worker_poll_timeout,
        ));
        workers.push(spawn_scheduler(
            sender_ssrc,
            receive_pipeline.stats.clone(),
            receive_pipeline.tcc_generator.clone(),
            receive_pipeline.retransmission_tracker.clone(),
            rtcp_sender,
            running.clone(),
            &config,
        ));

        Transceiver {
            state,
            receive_root: receive_pipeline.root,
            send_root: send_pipeline.root,
            rtp_handler: receive_pipeline.rtp_handler,
            rtcp_handler: receive_pipeline.rtcp_handler,
            srtp_factory,
            incoming_tx,
            outgoing_app_tx,
            outgoing_queue: Mutex::new(send_pipeline.outgoing),
            dropped_incoming_full: AtomicU64::new(0),
            running,
            workers: Mutex::new(workers),
            config,
            connection_stats,
        }
    }

    /// Round-trip time to the remote endpoint, if an SR/RR echo pair has
    /// been observed. See [`ConnectionStats`] for when this can be `None`.
    #[must_use]
    pub fn round_trip_time(&self) -> Option<Duration> {
        self.connection_stats.round_trip_time()
    }

    /// Non-blocking enqueue into the receive queue. Never drops silently —
    /// a full queue increments `dropped_incoming_full` and is logged at
    /// `DEBUG`.
    pub fn handle_incoming_packet(&self, bytes: Bytes) {
        let info = PacketInfo::new(PacketKind::Raw(bytes), Instant::now());
        if self.incoming_tx.try_send(info).is_err() {
            self.dropped_incoming_full.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(node = "handleIncomingPacket", "incoming queue full, packet dropped");
        }
    }

    #[must_use]
    pub fn dropped_incoming_full(&self) -> u64 {
        self.dropped_incoming_full.load(Ordering::Relaxed)
    }

    /// Enters the send pipeline's classify entry point. Caller is expected
    /// to have already tagged each packet's kind as `Audio` or `Video`.
    pub fn send_rtp(&self, packets: Vec<PacketInfo>) {
        for info in packets {
            if self.outgoing_app_tx.try_send(info).is_err() {
                tracing::debug!(node = "sendRtp", "outgoing app queue full, packet dropped");
            }
        }
    }

    /// Same entry point, for RTCP the caller (not this engine) generated.
    pub fn send_rtcp(&self, packets: Vec<RtcpPacket>) {
        for packet in packets {
            let info = PacketInfo::new(PacketKind::RtcpElement(packet), Instant::now());
            if self.outgoing_app_tx.try_send(info).is_err() {
                tracing::debug!(node = "sendRtcp", "outgoing app queue full, packet dropped");
            }
        }
    }

    /// Pulls one encrypted wire packet off the outgoing queue, if any is
    /// ready. The actual socket write is outside this crate.
    pub fn try_recv_outgoing(&self) -> Option<Bytes> {
        self.outgoing_queue.lock().try_recv().ok()
    }

    pub fn set_incoming_rtp_handler(&self, handler: Option<Arc<PacketHandler>>) {
        self.rtp_handler.store(handler);
    }

    pub fn set_incoming_rtcp_handler(&self, handler: Option<Arc<PacketHandler>>) {
        self.rtcp_handler.store(handler);
    }

    pub fn add_receive_ssrc(&self, ssrc: u32) {
        self.state.add_receive_ssrc(ssrc);
        self.broadcast(&Event::ReceiveSsrcAdded(ssrc));
    }

    pub fn remove_receive_ssrc(&self, ssrc: u32) {
        self.state.remove_receive_ssrc(ssrc);
        self.broadcast(&Event::ReceiveSsrcRemoved(ssrc));
    }

    pub fn add_dynamic_rtp_payload_type(&self, payload_type: u8, format: MediaFormat) {
        self.state.add_payload_type(payload_type, format);
        self.broadcast(&Event::PayloadTypeAdded { payload_type, format });
    }

    pub fn clear_dynamic_rtp_payload_types(&self) {
        self.state.clear_payload_types();
        self.broadcast(&Event::PayloadTypesCleared);
    }

    pub fn add_rtp_extension(&self, id: u8, uri: impl Into<String>) {
        let uri = uri.into();
        self.state.add_extension(id, uri.clone());
        self.broadcast(&Event::RtpExtensionAdded { id, uri });
    }

    /// Clears every negotiated extension mapping and broadcasts the event —
    /// an Open Question resolved in favor of the bulk-clear-and-notify
    /// behavior the RTP extension side already has, for symmetry with
    /// payload types.
    pub fn clear_rtp_extensions(&self) {
        self.state.clear_extensions();
        self.broadcast(&Event::RtpExtensionsCleared);
    }

    pub fn add_ssrc_association(&self, primary: u32, secondary: u32, kind: AssociationKind) {
        self.state.add_association(primary, secondary, kind);
        self.broadcast(&Event::SsrcAssociationAdded { primary, secondary, kind });
    }

    /// Derives SRTP/SRTCP keying material from a completed DTLS handshake
    /// and installs transformers on both directions.
    pub fn set_srtp_information(&self, profile: SrtpProfile, dtls: &dyn DtlsContext) -> Result<(), TransceiverError> {
        let keying_material = dtls.extract_keying_material(profile).ok_or_else(|| {
            TransceiverError::KeyingMaterialExtraction("DTLS handshake has not completed".to_string())
        })?;
        let (recv_transformer, send_transformer) = self.srtp_factory.build(keying_material);
        self.state.set_recv_transformer(recv_transformer);
        self.state.set_send_transformer(send_transformer);
        Ok(())
    }

    fn broadcast(&self, event: &Event) {
        broadcast_event(&self.receive_root, event);
        broadcast_event(&self.send_root, event);
    }

    /// Signals both worker threads and the scheduler to stop, then joins
    /// them with a bound of twice the poll timeout per thread. Returns
    /// [`TransceiverError::ShutdownTimedOut`] if any thread outlives its
    /// deadline rather than block indefinitely.
    pub fn stop(&self) -> Result<(), TransceiverError> {
        tracing::info!("transceiver stopping");
        self.running.store(false, Ordering::Release);
        let deadline = self.config.worker_poll_timeout * 2 + Duration::from_millis(50);

        let handles = std::mem::take(&mut *self.workers.lock());
        let mut all_joined = true;
        for handle in handles {
            if !join_with_timeout(handle, deadline) {
                all_joined = false;
            }
        }

        if all_joined {
            tracing::info!("transceiver stopped");
            Ok(())
        } else {
            tracing::debug!("one or more worker threads did not join within the shutdown deadline");
            Err(TransceiverError::ShutdownTimedOut)
        }
    }
}

fn spawn_receiver_worker(
    root: Arc<dyn Node>,
    incoming_rx: Receiver<PacketInfo>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("sfu-receiver".to_string())
        .spawn(move || {
            tracing::info!(worker = "receiver", "started");
            while running.load(Ordering::Acquire) {
                match incoming_rx.recv_timeout(poll_timeout) {
                    Ok(mut info) => {
                        info.mark("queue-exit");
                        root.process_packets(vec![info]);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::info!(worker = "receiver", "stopped");
        })
        .expect("failed to spawn receiver worker thread")
}

fn spawn_sender_worker(
    root: Arc<dyn Node>,
    outgoing_app_rx: Receiver<PacketInfo>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("sfu-sender".to_string())
        .spawn(move || {
            tracing::info!(worker = "sender", "started");
            while running.load(Ordering::Acquire) {
                match outgoing_app_rx.recv_timeout(poll_timeout) {
                    Ok(mut info) => {
                        info.mark("queue-exit");
                        root.process_packets(vec![info]);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::info!(worker = "sender", "stopped");
        })
        .expect("failed to spawn sender worker thread")
}

#[allow(clippy::too_many_arguments)]
fn spawn_scheduler(
    sender_ssrc: u32,
    stats: Arc<IncomingStatsTable>,
    tcc_generator: Arc<TransportCcGenerator>,
    retransmission_tracker: Arc<RetransmissionTracker>,
    rr_sender: crate::callback::RtcpSender,
    running: Arc<AtomicBool>,
    config: &TransceiverConfig,
) -> JoinHandle<()> {
    let rr_interval = config.rr_interval;
    let tcc_interval = config.tcc_feedback_interval;
    thread::Builder::new()
        .name("sfu-scheduler".to_string())
        .spawn(move || {
            tracing::info!(worker = "scheduler", "started");
            let mut last_rr = Instant::now();
            let mut last_tcc = Instant::now();
            while running.load(Ordering::Acquire) {
                thread::sleep(SCHEDULER_TICK);
                if !running.load(Ordering::Acquire) {
                    break;
                }
                let now = Instant::now();

                retransmission_tracker.flush_expired(now);

                if now.duration_since(last_tcc) >= tcc_interval {
                    tcc_generator.flush();
                    last_tcc = now;
                }

                if now.duration_since(last_rr) >= rr_interval {
                    let snapshot = stats.snapshot_all(now);
                    if !snapshot.is_empty() {
                        let mut out = Vec::new();
                        build_rr(
                            &ReceiverStatistics {
                                reporter_ssrc: sender_ssrc,
                                reports: &snapshot,
                                profile_extensions: &[],
                            },
                            &mut out,
                        );
                        for packet in out {
                            rr_sender(packet);
                        }
                    }
                    last_rr = now;
                }
            }
            tracing::info!(worker = "scheduler", "stopped");
        })
        .expect("failed to spawn background scheduler thread")
}

/// Joins `handle`, giving up (and leaking the join) after `timeout` rather
/// than block `stop()` indefinitely — `std::thread::JoinHandle` has no
/// built-in timed join, so this proxies through a completion channel.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{IdentityTransformer, PacketTransformer, SrtpKeyingMaterial};
    use std::time::Duration as StdDuration;

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

    struct IdentityFactory;
    impl SrtpTransformerFactory for IdentityFactory {
        fn build(&self, _keying_material: SrtpKeyingMaterial) -> (Arc<dyn PacketTransformer>, Arc<dyn PacketTransformer>) {
            (Arc::new(IdentityTransformer), Arc::new(IdentityTransformer))
        }
    }

    struct AlwaysReadyDtls;
    impl DtlsContext for AlwaysReadyDtls {
        fn extract_keying_material(&self, _profile: SrtpProfile) -> Option<SrtpKeyingMaterial> {
            Some(SrtpKeyingMaterial {
                client_write_key: Bytes::from_static(b"k"),
                server_write_key: Bytes::from_static(b"k"),
            })
        }
    }

    fn test_transceiver() -> Transceiver {
        let config = TransceiverConfig::builder()
            .worker_poll_timeout(StdDuration::from_millis(10))
            .build();
        Transceiver::new(config, 0xF00D, Arc::new(NoopVp8), None, Arc::new(IdentityFactory), None)
    }

    #[test]
    fn set_srtp_information_installs_transformers_on_both_directions() {
        let transceiver = test_transceiver();
        transceiver.set_srtp_information(SrtpProfile(1), &AlwaysReadyDtls).unwrap();
        transceiver.stop().unwrap();
    }

    #[test]
    fn stop_completes_within_the_bounded_deadline() {
        let transceiver = test_transceiver();
        let started = Instant::now();
        transceiver.stop().unwrap();
        assert!(started.elapsed() < StdDuration::from_millis(200));
    }

    #[tracing_test::traced_test]
    #[test]
    fn stop_logs_worker_shutdown() {
        let transceiver = test_transceiver();
        transceiver.stop().unwrap();
        assert!(logs_contain("transceiver stopped"));
    }

    #[test]
    fn handle_incoming_packet_reaches_registered_rtp_handler() {
        use sfu_core::MediaFormat;
        use sfu_rtp::{RtpHeader, RtpPacketBuilder};

        let transceiver = test_transceiver();
        transceiver.add_dynamic_rtp_payload_type(111, MediaFormat::Audio);
        transceiver
            .set_srtp_information(SrtpProfile(1), &AlwaysReadyDtls)
            .unwrap();

        let received = Arc::new(Mutex::new(0usize));
        let received2 = received.clone();
        transceiver.set_incoming_rtp_handler(Some(Arc::new(move |batch: &[PacketInfo]| {
            *received2.lock() += batch.len();
        })));

        let header = RtpHeader { payload_type: 111, ssrc: 0xA, ..RtpHeader::default() };
        let wire = RtpPacketBuilder::new(header).payload(Bytes::from_static(b"opus")).encode().unwrap();
        transceiver.handle_incoming_packet(wire);

        std::thread::sleep(StdDuration::from_millis(100));
        assert_eq!(*received.lock(), 1);
        transceiver.stop().unwrap();
    }

    #[test]
    fn periodic_rr_reports_ten_received_packets() {
        use sfu_core::MediaFormat;
        use sfu_rtp::{RtpHeader, RtpPacketBuilder};

        let config = TransceiverConfig::builder()
            .worker_poll_timeout(StdDuration::from_millis(10))
            .rr_interval(StdDuration::from_millis(50))
            .build();
        let transceiver = Transceiver::new(config, 0xF00D, Arc::new(NoopVp8), None, Arc::new(IdentityFactory), None);
        transceiver.add_dynamic_rtp_payload_type(111, MediaFormat::Audio);
        transceiver
            .set_srtp_information(SrtpProfile(1), &AlwaysReadyDtls)
            .unwrap();

        for seq in 0u16..10 {
            let header = RtpHeader { payload_type: 111, ssrc: 0xB, sequence_number: seq, ..RtpHeader::default() };
            let wire = RtpPacketBuilder::new(header).payload(Bytes::from_static(b"opus")).encode().unwrap();
            transceiver.handle_incoming_packet(wire);
        }

        std::thread::sleep(StdDuration::from_millis(200));

        let mut found_rr = false;
        while let Some(wire) = transceiver.try_recv_outgoing() {
            if let Ok(sfu_rtcp::RtcpPacket::ReceiverReport(rr)) = sfu_rtcp::parse_packet(wire) {
                if let Some(report) = rr.reports.iter().find(|r| r.source_ssrc == 0xB) {
                    assert_eq!(report.cumulative_lost, 0);
                    found_rr = true;
                }
            }
        }
        assert!(found_rr, "expected at least one RR covering SSRC 0xB");
        transceiver.stop().unwrap();
    }

    struct RecordingSink(Arc<Mutex<Vec<u16>>>);
    impl BandwidthEstimatorSink for RecordingSink {
        fn on_feedback(&self, feedback: &sfu_rtcp::TransportCcFeedback) {
            self.0.lock().push(feedback.base_sequence);
        }
    }

    #[test]
    fn installed_bandwidth_sink_receives_transport_cc_feedback() {
        let config = TransceiverConfig::builder()
            .worker_poll_timeout(StdDuration::from_millis(10))
            .build();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn BandwidthEstimatorSink> = Arc::new(RecordingSink(received.clone()));
        let transceiver = Transceiver::new(config, 0xF00D, Arc::new(NoopVp8), None, Arc::new(IdentityFactory), Some(sink));
        transceiver
            .set_srtp_information(SrtpProfile(1), &AlwaysReadyDtls)
            .unwrap();

        let fb = RtcpPacket::TransportCc(sfu_rtcp::TransportCcFeedback {
            sender_ssrc: 1,
            media_ssrc: 2,
            fb_pkt_count: 0,
            base_sequence: 42,
            reference_time_64us: 0,
            packets: Vec::new(),
        });
        transceiver.handle_incoming_packet(sfu_rtcp::encode_packet(&fb));

        std::thread::sleep(StdDuration::from_millis(100));
        assert_eq!(*received.lock(), vec![42]);
        transceiver.stop().unwrap();
    }

    #[test]
    fn clear_dynamic_rtp_payload_types_removes_every_entry() {
        use sfu_core::MediaFormat;

        let transceiver = test_transceiver();
        transceiver.add_dynamic_rtp_payload_type(111, MediaFormat::Audio);
        transceiver.add_dynamic_rtp_payload_type(96, MediaFormat::Video);
        transceiver.clear_dynamic_rtp_payload_types();

        assert_eq!(transceiver.state.payload_type_format(111), None);
        assert_eq!(transceiver.state.payload_type_format(96), None);
        transceiver.stop().unwrap();
    }
}
