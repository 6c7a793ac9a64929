//! Retransmission requester (RetransmissionRequester, §4.4): tracks received
//! sequence numbers per SSRC and emits a generic NACK (RFC 4585 §6.2.1) for
//! any gap that outlives the configured delay.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sfu_rtcp::{GenericNack, NackBlock, RtcpPacket};
use sfu_rtp::seq_diff;

use crate::callback::RtcpSender;

struct Gap {
    first_missing_at: Instant,
    notified: bool,
}

struct SsrcState {
    highest_seq: u16,
    gaps: HashMap<u16, Gap>,
}

/// Per-SSRC gap tracker. `record` is called from the receive pipeline as
/// packets arrive; `flush_expired` is called by the background scheduler.
pub struct RetransmissionTracker {
    sender_ssrc: u32,
    nack_delay: Duration,
    rtcp_sender: RtcpSender,
    state: Mutex<HashMap<u32, SsrcState>>,
}

impl RetransmissionTracker {
    #[must_use]
    pub fn new(sender_ssrc: u32, nack_delay: Duration, rtcp_sender: RtcpSender) -> Self {
        Self {
            sender_ssrc,
            nack_delay,
            rtcp_sender,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Observes one received sequence number. Any sequence skipped since the
    /// last-seen highest is recorded as a pending gap; a sequence that
    /// arrives late clears its own gap entry (suppresses a redundant NACK).
    pub fn record(&self, ssrc: u32, sequence_number: u16, now: Instant) {
        let mut state = self.state.lock();
        let entry = state.entry(ssrc).or_insert_with(|| SsrcState {
            highest_seq: sequence_number,
            gaps: HashMap::new(),
        });

        entry.gaps.remove(&sequence_number);

        let diff = seq_diff(entry.highest_seq, sequence_number);
        if diff > 1 {
            let mut missing = entry.highest_seq.wrapping_add(1);
            while missing != sequence_number {
                entry.gaps.insert(missing, Gap { first_missing_at: now, notified: false });
                missing = missing.wrapping_add(1);
            }
        }
        if diff > 0 {
            entry.highest_seq = sequence_number;
        }
    }

    /// Emits one NACK per SSRC with at least one gap older than the
    /// configured delay, then marks those entries notified so a later call
    /// doesn't re-request the same sequence number.
    pub fn flush_expired(&self, now: Instant) {
        let mut state = self.state.lock();
        for (&ssrc, entry) in state.iter_mut() {
            let due: Vec<u16> = entry
                .gaps
                .iter()
                .filter(|(_, gap)| !gap.notified && now.duration_since(gap.first_missing_at) >= self.nack_delay)
                .map(|(&seq, _)| seq)
                .collect();
            if due.is_empty() {
                continue;
            }
            for seq in &due {
                entry.gaps.get_mut(seq).unwrap().notified = true;
            }
            let nack = GenericNack {
                sender_ssrc: self.sender_ssrc,
                media_ssrc: ssrc,
                entries: due.into_iter().map(|pid| NackBlock { pid, blp: 0 }).collect(),
            };
            (self.rtcp_sender)(RtcpPacket::Nack(nack));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex as StdMutex};

    fn sender() -> (RtcpSender, Arc<StdMutex<Vec<RtcpPacket>>>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sent2 = sent.clone();
        (Arc::new(move |pkt| sent2.lock().unwrap().push(pkt)), sent)
    }

    #[test]
    fn gap_produces_a_nack_after_the_delay_elapses() {
        let (sender_cb, sent) = sender();
        let tracker = RetransmissionTracker::new(1, Duration::from_millis(20), sender_cb);
        let now = Instant::now();

        for seq in [1u16, 2, 3, 5, 6, 7] {
            tracker.record(0xC, seq, now);
        }
        tracker.flush_expired(now); // too early
        assert!(sent.lock().unwrap().is_empty());

        tracker.flush_expired(now + Duration::from_millis(25));
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            RtcpPacket::Nack(nack) => {
                assert_eq!(nack.media_ssrc, 0xC);
                assert_eq!(nack.entries[0].pid, 4);
            }
            _ => panic!("expected a NACK"),
        }
    }

    #[test]
    fn late_arrival_clears_its_own_gap() {
        let (sender_cb, sent) = sender();
        let tracker = RetransmissionTracker::new(1, Duration::from_millis(20), sender_cb);
        let now = Instant::now();
        tracker.record(0xD, 1, now);
        tracker.record(0xD, 3, now);
        tracker.record(0xD, 2, now); // late arrival fills the gap

        tracker.flush_expired(now + Duration::from_millis(25));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn repeated_flush_does_not_renotify() {
        let (sender_cb, sent) = sender();
        let tracker = RetransmissionTracker::new(1, Duration::from_millis(10), sender_cb);
        let now = Instant::now();
        tracker.record(0xE, 1, now);
        tracker.record(0xE, 3, now);

        let later = now + Duration::from_millis(15);
        tracker.flush_expired(later);
        tracker.flush_expired(later + Duration::from_millis(15));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    proptest! {
        /// Feeding an arbitrary strictly-increasing run of step sizes (1..=5,
        /// starting from 0) in order produces exactly one NACK whose entries
        /// are the sequence numbers the steps skipped over, regardless of
        /// how the gaps are distributed.
        #[test]
        fn flush_reports_exactly_the_skipped_sequence_numbers(steps in prop::collection::vec(1u16..=5, 1..30)) {
            let (sender_cb, sent) = sender();
            let tracker = RetransmissionTracker::new(1, Duration::from_millis(10), sender_cb);
            let now = Instant::now();

            let mut expected_missing = HashSet::new();
            let mut seq = 0u16;
            tracker.record(0xF, seq, now);
            for step in steps {
                for missing in 1..step {
                    expected_missing.insert(seq.wrapping_add(missing));
                }
                seq = seq.wrapping_add(step);
                tracker.record(0xF, seq, now);
            }

            tracker.flush_expired(now + Duration::from_millis(15));
            let sent = sent.lock().unwrap();

            if expected_missing.is_empty() {
                prop_assert!(sent.is_empty());
            } else {
                prop_assert_eq!(sent.len(), 1);
                match &sent[0] {
                    RtcpPacket::Nack(nack) => {
                        let reported: HashSet<u16> = nack.entries.iter().map(|e| e.pid).collect();
                        prop_assert_eq!(reported, expected_missing);
                    }
                    _ => prop_assert!(false, "expected a NACK"),
                }
            }
        }
    }
}
