//! Transport-wide congestion control engine interface (C11): this crate
//! hosts the feedback *generator* only. Bandwidth-estimation policy that
//! would consume the generated feedback is explicitly out of scope (§1
//! Non-goals) and modeled as an abstract sink trait other crates implement.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use sfu_rtcp::{RtcpPacket, TccPacketStatus, TransportCcFeedback};

use crate::callback::RtcpSender;
use crate::rtcp_notifier::RtcpSubscriber;

/// Consumes transport-wide-cc feedback as it's generated, to drive a
/// bandwidth estimate. This engine never implements one itself.
pub trait BandwidthEstimatorSink: Send + Sync {
    fn on_feedback(&self, feedback: &TransportCcFeedback);
}

/// Forwards every `TransportCc` packet the notifier publishes to an
/// installed [`BandwidthEstimatorSink`]; every other packet kind is ignored.
struct FeedbackForwarder(Arc<dyn BandwidthEstimatorSink>);

impl RtcpSubscriber for FeedbackForwarder {
    fn on_rtcp(&self, packet: &RtcpPacket) {
        if let RtcpPacket::TransportCc(feedback) = packet {
            self.0.on_feedback(feedback);
        }
    }
}

/// Boxes `sink` as an [`RtcpSubscriber`] for
/// [`crate::rtcp_notifier::RtcpEventNotifier::subscribe`].
#[must_use]
pub fn bandwidth_estimator_subscriber(sink: Arc<dyn BandwidthEstimatorSink>) -> Box<dyn RtcpSubscriber> {
    Box::new(FeedbackForwarder(sink))
}

struct Observation {
    sequence_number: u16,
    arrival: Instant,
}

/// Accumulates per-receipt transport-cc observations and periodically emits
/// one feedback packet covering them, via `rtcp_sender`.
pub struct TransportCcGenerator {
    sender_ssrc: u32,
    media_ssrc: u32,
    rtcp_sender: RtcpSender,
    fb_pkt_count: AtomicU8,
    observations: Mutex<Vec<Observation>>,
    epoch: Instant,
}

impl TransportCcGenerator {
    #[must_use]
    pub fn new(sender_ssrc: u32, media_ssrc: u32, rtcp_sender: RtcpSender) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
            rtcp_sender,
            fb_pkt_count: AtomicU8::new(0),
            observations: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// Records one packet's transport-wide-cc sequence number and arrival
    /// time. Called from `TCCGenerator` node as packets pass through.
    pub fn observe(&self, sequence_number: u16, arrival: Instant) {
        self.observations.lock().push(Observation { sequence_number, arrival });
    }

    /// Builds and sends one feedback packet covering everything observed
    /// since the last flush; no-op if nothing was observed. Called by the
    /// background scheduler at the configured cadence.
    pub fn flush(&self) {
        let mut observations = self.observations.lock();
        if observations.is_empty() {
            return;
        }
        observations.sort_by_key(|o| o.sequence_number);
        let base_sequence = observations[0].sequence_number;
        let reference = observations[0].arrival;

        let packets: Vec<TccPacketStatus> = observations
            .iter()
            .map(|o| {
                let delta_ticks = o.arrival.saturating_duration_since(reference).as_micros() / 250;
                let delta_250us = i16::try_from(delta_ticks).ok();
                TccPacketStatus { sequence_number: o.sequence_number, delta_250us }
            })
            .collect();
        observations.clear();
        drop(observations);

        let reference_time_64us = (reference.duration_since(self.epoch).as_micros() / 64) as i32;
        let fb_pkt_count = self.fb_pkt_count.fetch_add(1, Ordering::Relaxed);

        let feedback = TransportCcFeedback {
            sender_ssrc: self.sender_ssrc,
            media_ssrc: self.media_ssrc,
            fb_pkt_count,
            base_sequence,
            reference_time_64us,
            packets,
        };
        (self.rtcp_sender)(RtcpPacket::TransportCc(feedback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn flush_emits_one_packet_covering_all_observations() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sent2 = sent.clone();
        let sender: RtcpSender = Arc::new(move |pkt| sent2.lock().unwrap().push(pkt));
        let generator = TransportCcGenerator::new(1, 2, sender);

        let now = Instant::now();
        generator.observe(10, now);
        generator.observe(11, now + std::time::Duration::from_millis(5));
        generator.flush();

        assert_eq!(sent.lock().unwrap().len(), 1);
        match &sent.lock().unwrap()[0] {
            RtcpPacket::TransportCc(fb) => {
                assert_eq!(fb.base_sequence, 10);
                assert_eq!(fb.packets.len(), 2);
            }
            _ => panic!("expected transport-cc feedback"),
        }
    }

    #[test]
    fn flush_with_no_observations_sends_nothing() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sent2 = sent.clone();
        let sender: RtcpSender = Arc::new(move |pkt| sent2.lock().unwrap().push(pkt));
        let generator = TransportCcGenerator::new(1, 2, sender);
        generator.flush();
        assert!(sent.lock().unwrap().is_empty());
    }

    struct RecordingSink(Arc<StdMutex<Vec<TransportCcFeedback>>>);
    impl BandwidthEstimatorSink for RecordingSink {
        fn on_feedback(&self, feedback: &TransportCcFeedback) {
            self.0.lock().unwrap().push(feedback.clone());
        }
    }

    #[test]
    fn feedback_forwarder_only_passes_transport_cc_packets() {
        let received = Arc::new(StdMutex::new(Vec::new()));
        let sink: Arc<dyn BandwidthEstimatorSink> = Arc::new(RecordingSink(received.clone()));
        let subscriber = bandwidth_estimator_subscriber(sink);

        let fb = TransportCcFeedback {
            sender_ssrc: 1,
            media_ssrc: 2,
            fb_pkt_count: 0,
            base_sequence: 10,
            reference_time_64us: 0,
            packets: Vec::new(),
        };
        subscriber.on_rtcp(&RtcpPacket::TransportCc(fb.clone()));
        subscriber.on_rtcp(&RtcpPacket::Goodbye(sfu_rtcp::Goodbye { sources: vec![1], reason: None }));

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].base_sequence, 10);
    }
}
