//! Endpoint connection statistics (C8): round-trip time derived from SR/RR
//! pairs per RFC 3550 Appendix A.8. A report's `last_sr_timestamp`/
//! `delay_since_last_sr` only describe an RTT when the report echoes a
//! Sender Report *this* endpoint sent — matching requires a table of our
//! own recently-sent SRs, keyed by the same compact LSR value the remote
//! echoes back.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sfu_rtcp::{decode_delay_since_last_sr, NtpTime, RtcpPacket};

use crate::rtcp_notifier::RtcpSubscriber;

/// How long an unmatched sent-SR entry is kept before being discarded as
/// stale (bounds the table's size under packet loss).
const SENT_SR_RETENTION: Duration = Duration::from_secs(60);

struct SentSenderReport {
    ntp: NtpTime,
    sent_at: Instant,
}

/// Tracks round-trip time for one remote endpoint from SR/RR echo pairs.
pub struct ConnectionStats {
    sent_reports: Mutex<HashMap<u32, SentSenderReport>>,
    last_rtt: Mutex<Option<Duration>>,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self { sent_reports: Mutex::new(HashMap::new()), last_rtt: Mutex::new(None) }
    }
}

impl ConnectionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that this endpoint sent a Sender Report with capture time
    /// `ntp` at local time `sent_at`, so a later echo of its LSR can be
    /// matched back to a wall-clock send time. This engine currently has no
    /// Sender Report generator (it only ever produces Receiver Reports), so
    /// nothing calls this yet — see the grounding notes.
    pub fn note_sent_sender_report(&self, ntp: NtpTime, sent_at: Instant) {
        let mut sent = self.sent_reports.lock();
        sent.retain(|_, report| sent_at.saturating_duration_since(report.sent_at) < SENT_SR_RETENTION);
        sent.insert(ntp.lsr(), SentSenderReport { ntp, sent_at });
    }

    fn process(&self, packet: &RtcpPacket) {
        let now = Instant::now();
        for report in packet.reception_reports() {
            if report.last_sr_timestamp == 0 {
                continue;
            }
            let sent_at = {
                let mut sent = self.sent_reports.lock();
                sent.remove(&report.last_sr_timestamp).map(|r| r.sent_at)
            };
            let Some(sent_at) = sent_at else { continue };
            let dlsr = decode_delay_since_last_sr(report.delay_since_last_sr);
            let since_sent = now.saturating_duration_since(sent_at);
            if let Some(rtt) = since_sent.checked_sub(dlsr) {
                *self.last_rtt.lock() = Some(rtt);
            }
        }
    }

    /// The most recently computed round-trip time, if any report has yet
    /// echoed an SR this endpoint sent.
    #[must_use]
    pub fn round_trip_time(&self) -> Option<Duration> {
        *self.last_rtt.lock()
    }
}

/// Adapts a [`ConnectionStats`] to the notifier's subscriber trait without
/// requiring an `Arc<ConnectionStats>`-specific trait impl.
struct ConnectionStatsSubscriber(std::sync::Arc<ConnectionStats>);

impl RtcpSubscriber for ConnectionStatsSubscriber {
    fn on_rtcp(&self, packet: &RtcpPacket) {
        self.0.process(packet);
    }
}

impl ConnectionStats {
    /// Boxes a subscriber handle for [`crate::rtcp_notifier::RtcpEventNotifier::subscribe`]
    /// that forwards every observed packet into `self`.
    #[must_use]
    pub fn subscriber(self: &std::sync::Arc<Self>) -> Box<dyn RtcpSubscriber> {
        Box::new(ConnectionStatsSubscriber(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_rtcp::{ReceiverReport, ReceptionReport};
    use std::time::Duration as StdDuration;

    fn report(last_sr_timestamp: u32, delay_since_last_sr: u32) -> RtcpPacket {
        RtcpPacket::ReceiverReport(ReceiverReport {
            reporter_ssrc: 1,
            reports: vec![ReceptionReport {
                source_ssrc: 2,
                fraction_lost: 0,
                cumulative_lost: 0,
                extended_highest_sequence: 0,
                interarrival_jitter: 0,
                last_sr_timestamp,
                delay_since_last_sr,
            }],
            profile_extensions: Vec::new(),
        })
    }

    #[test]
    fn unmatched_lsr_produces_no_rtt() {
        let stats = ConnectionStats::new();
        stats.process(&report(0x1234_5678, 0));
        assert_eq!(stats.round_trip_time(), None);
    }

    #[test]
    fn matching_lsr_computes_rtt_minus_dlsr() {
        let stats = ConnectionStats::new();
        let ntp = NtpTime::from_parts(3_000_000_000, 0);
        let sent_at = Instant::now() - StdDuration::from_millis(200);
        stats.note_sent_sender_report(ntp, sent_at);

        let dlsr = sfu_rtcp::encode_delay_since_last_sr(StdDuration::from_millis(50));
        stats.process(&report(ntp.lsr(), dlsr));

        let rtt = stats.round_trip_time().expect("rtt computed");
        assert!(rtt >= StdDuration::from_millis(130) && rtt <= StdDuration::from_millis(170));
    }

    #[test]
    fn zero_last_sr_timestamp_is_ignored() {
        let stats = ConnectionStats::new();
        stats.process(&report(0, 0));
        assert_eq!(stats.round_trip_time(), None);
    }
}
