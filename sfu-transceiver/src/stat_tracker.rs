//! Incoming statistics tracker (C10): per-SSRC sequence window, jitter
//! accumulator, and cumulative-lost counter feeding the RR generator.
//! Grounded in `sfu_rtcp::stats`'s reporting shape — this module produces
//! the numbers that shape packs into wire bytes.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use sfu_rtcp::{NtpTime, ReceptionStatistics};
use sfu_rtp::seq_diff;

/// Per-SSRC reception bookkeeping (RFC 3550 §A.3/§A.8).
struct SsrcTracker {
    base_sequence: u16,
    extended_highest_sequence: u32,
    packets_received: u64,
    /// `(expected, received)` as of the last report, for the interval
    /// fraction-lost calculation.
    expected_prior: u32,
    received_prior: u64,
    jitter: f64,
    last_transit: Option<i64>,
    epoch: Instant,
    last_sr: Option<NtpTime>,
    last_sr_received_at: Option<Instant>,
}

impl SsrcTracker {
    fn new(first_sequence: u16, now: Instant) -> Self {
        Self {
            base_sequence: first_sequence,
            extended_highest_sequence: first_sequence as u32,
            packets_received: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: 0.0,
            last_transit: None,
            epoch: now,
            last_sr: None,
            last_sr_received_at: None,
        }
    }

    fn record(&mut self, sequence_number: u16, rtp_timestamp: u32, arrival: Instant, clock_rate: u32) {
        self.packets_received += 1;

        let highest_seq = (self.extended_highest_sequence & 0xFFFF) as u16;
        let diff = seq_diff(highest_seq, sequence_number);
        if diff > 0 {
            // Sequence advanced; account for one wraparound if it just occurred.
            if sequence_number < highest_seq {
                self.extended_highest_sequence = self.extended_highest_sequence.wrapping_add(0x1_0000);
            }
            self.extended_highest_sequence = (self.extended_highest_sequence & 0xFFFF_0000) | sequence_number as u32;
        }

        let arrival_units = (arrival.duration_since(self.epoch).as_secs_f64() * clock_rate as f64) as i64;
        let transit = arrival_units.wrapping_sub(rtp_timestamp as i64);
        if let Some(last_transit) = self.last_transit {
            let d = (transit - last_transit).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    fn note_sender_report(&mut self, ntp: NtpTime, received_at: Instant) {
        self.last_sr = Some(ntp);
        self.last_sr_received_at = Some(received_at);
    }

    fn expected(&self) -> u32 {
        self.extended_highest_sequence - self.base_sequence as u32 + 1
    }

    fn to_reception_statistics(&mut self, source_ssrc: u32, now: Instant) -> ReceptionStatistics {
        let expected = self.expected();
        let cumulative_lost = expected as i64 - self.packets_received as i64;

        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.packets_received.saturating_sub(self.received_prior);
        let lost_interval = expected_interval as i64 - received_interval as i64;
        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval.min(expected_interval as i64) * 256) / expected_interval as i64) as u8
        };
        self.expected_prior = expected;
        self.received_prior = self.packets_received;

        ReceptionStatistics {
            source_ssrc,
            fraction_lost,
            cumulative_lost: cumulative_lost as i32,
            extended_highest_sequence: self.extended_highest_sequence,
            interarrival_jitter: self.jitter as u32,
            last_sr: self.last_sr,
            delay_since_last_sr: self.last_sr_received_at.map(|t| now.duration_since(t)),
        }
    }
}

/// Concurrent, per-SSRC receive-statistics table. One instance is shared
/// between `StatTracker` (receive pipeline) and the RR generator.
pub struct IncomingStatsTable {
    trackers: RwLock<HashMap<u32, SsrcTracker>>,
}

impl Default for IncomingStatsTable {
    fn default() -> Self {
        Self { trackers: RwLock::new(HashMap::new()) }
    }
}

impl IncomingStatsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ssrc: u32, sequence_number: u16, rtp_timestamp: u32, arrival: Instant, clock_rate: u32) {
        let mut trackers = self.trackers.write();
        trackers
            .entry(ssrc)
            .or_insert_with(|| SsrcTracker::new(sequence_number, arrival))
            .record(sequence_number, rtp_timestamp, arrival, clock_rate);
    }

    pub fn note_sender_report(&self, ssrc: u32, ntp: NtpTime, received_at: Instant) {
        if let Some(tracker) = self.trackers.write().get_mut(&ssrc) {
            tracker.note_sender_report(ntp, received_at);
        }
    }

    /// Snapshots every tracked SSRC's reception statistics, resetting each
    /// tracker's interval counters (as RFC 3550 §A.3 requires between RRs).
    #[must_use]
    pub fn snapshot_all(&self, now: Instant) -> Vec<ReceptionStatistics> {
        self.trackers
            .write()
            .iter_mut()
            .map(|(ssrc, tracker)| tracker.to_reception_statistics(*ssrc, now))
            .collect()
    }

    #[must_use]
    pub fn packets_received(&self, ssrc: u32) -> Option<u64> {
        self.trackers.read().get(&ssrc).map(|t| t.packets_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sequential_packets_yield_zero_loss() {
        let table = IncomingStatsTable::new();
        let now = Instant::now();
        for i in 0..10u16 {
            table.record(0xB, 100 + i, 1000 + i as u32 * 160, now + Duration::from_millis(i as u64 * 20), 8000);
        }
        let snapshot = table.snapshot_all(now + Duration::from_secs(2));
        let stats = snapshot.iter().find(|s| s.source_ssrc == 0xB).unwrap();
        assert_eq!(stats.cumulative_lost, 0);
        assert_eq!(stats.extended_highest_sequence, 109);
    }

    #[test]
    fn gap_is_reflected_in_cumulative_lost() {
        let table = IncomingStatsTable::new();
        let now = Instant::now();
        for seq in [1u16, 2, 3, 5, 6, 7] {
            table.record(0xC, seq, seq as u32 * 160, now, 8000);
        }
        let snapshot = table.snapshot_all(now);
        let stats = snapshot.iter().find(|s| s.source_ssrc == 0xC).unwrap();
        assert_eq!(stats.cumulative_lost, 1);
    }
}
