//! RTCP report generation from statistics snapshots (RFC 3550 §6.3-6.4).
//!
//! Keeps the "statistics → RTCP packet" construction in one place so the
//! production `ReceiverReportGenerator` (in `sfu-transceiver`) and unit
//! tests share identical packing/clamping logic.

use std::cmp;
use std::time::Duration;

use crate::packet::{ReceiverReport, ReceptionReport, RtcpPacket, SenderInfo, SenderReport};

/// Maps a capture-time NTP timestamp to the matching RTP media timestamp,
/// so a Sender Report's two time references stay mutually consistent.
pub trait RtpClock {
    fn to_rtp_timestamp(&self, ntp: &NtpTime) -> u32;
}

/// A 64-bit NTP timestamp: 32-bit seconds plus 32-bit fraction (RFC 3550 §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTime {
    seconds: u32,
    fraction: u32,
}

impl NtpTime {
    #[must_use]
    pub const fn from_parts(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    #[must_use]
    pub const fn seconds(&self) -> u32 {
        self.seconds
    }

    #[must_use]
    pub const fn fraction(&self) -> u32 {
        self.fraction
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// RFC 3550's compact "Last SR" (LSR) representation: the middle 32 bits.
    #[must_use]
    pub const fn lsr(&self) -> u32 {
        ((self.seconds & 0xFFFF) << 16) | (self.fraction >> 16)
    }

    /// Splits a packed 64-bit NTP timestamp (as carried in `SenderInfo`) back
    /// into seconds/fraction.
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self { seconds: (value >> 32) as u32, fraction: value as u32 }
    }

    /// Seconds elapsed between the NTP and Unix epochs (RFC 868).
    const NTP_UNIX_EPOCH_DELTA: u64 = 2_208_988_800;

    /// The current wall-clock time as an NTP timestamp.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let seconds = since_epoch.as_secs().saturating_add(Self::NTP_UNIX_EPOCH_DELTA) as u32;
        let fraction = ((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self { seconds, fraction: fraction as u32 }
    }
}

/// Raw measurements for one reception report block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionStatistics {
    pub source_ssrc: u32,
    pub fraction_lost: u8,
    /// Clamped to the 24-bit signed range `[-8_388_608, 8_388_607]` when built.
    pub cumulative_lost: i32,
    pub extended_highest_sequence: u32,
    pub interarrival_jitter: u32,
    pub last_sr: Option<NtpTime>,
    pub delay_since_last_sr: Option<Duration>,
}

/// Inputs for building a Sender Report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderStatistics<'a> {
    pub sender_ssrc: u32,
    pub capture_ntp: NtpTime,
    pub rtp_timestamp_override: Option<u32>,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
    pub reports: &'a [ReceptionStatistics],
    pub profile_extensions: &'a [u8],
}

/// Inputs for building a Receiver Report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverStatistics<'a> {
    pub reporter_ssrc: u32,
    pub reports: &'a [ReceptionStatistics],
    pub profile_extensions: &'a [u8],
}

/// Builds a Sender Report and appends it to `out`.
pub fn build_sr<C: RtpClock>(clock: &C, stats: &SenderStatistics<'_>, out: &mut Vec<RtcpPacket>) {
    let rtp_timestamp = stats
        .rtp_timestamp_override
        .unwrap_or_else(|| clock.to_rtp_timestamp(&stats.capture_ntp));

    let sender_info = SenderInfo {
        ntp_timestamp: stats.capture_ntp.as_u64(),
        rtp_timestamp,
        sender_packet_count: stats.sender_packet_count,
        sender_octet_count: stats.sender_octet_count,
    };

    let reports = stats.reports.iter().map(reception_from_stats).collect();

    out.push(RtcpPacket::SenderReport(SenderReport {
        sender_ssrc: stats.sender_ssrc,
        sender_info,
        reports,
        profile_extensions: stats.profile_extensions.to_vec(),
    }));
}

/// Builds a Receiver Report and appends it to `out`.
pub fn build_rr(stats: &ReceiverStatistics<'_>, out: &mut Vec<RtcpPacket>) {
    let reports = stats.reports.iter().map(reception_from_stats).collect();

    out.push(RtcpPacket::ReceiverReport(ReceiverReport {
        reporter_ssrc: stats.reporter_ssrc,
        reports,
        profile_extensions: stats.profile_extensions.to_vec(),
    }));
}

fn reception_from_stats(stats: &ReceptionStatistics) -> ReceptionReport {
    ReceptionReport {
        source_ssrc: stats.source_ssrc,
        fraction_lost: stats.fraction_lost,
        cumulative_lost: clamp_cumulative_lost(stats.cumulative_lost),
        extended_highest_sequence: stats.extended_highest_sequence,
        interarrival_jitter: stats.interarrival_jitter,
        last_sr_timestamp: stats.last_sr.map_or(0, |ntp| ntp.lsr()),
        delay_since_last_sr: stats.delay_since_last_sr.map_or(0, encode_delay_since_last_sr),
    }
}

const MIN_CUMULATIVE_LOST: i32 = -0x80_0000;
const MAX_CUMULATIVE_LOST: i32 = 0x7F_FFFF;

#[must_use]
pub fn clamp_cumulative_lost(value: i32) -> i32 {
    value.clamp(MIN_CUMULATIVE_LOST, MAX_CUMULATIVE_LOST)
}

/// Encodes a delay as RFC 3550's "1/65536 second" `DLSR`-style fixed point.
#[must_use]
pub fn encode_delay_since_last_sr(delay: Duration) -> u32 {
    let coarse = delay.as_secs().saturating_mul(65_536);
    let fine = (delay.subsec_nanos() as u64 * 65_536) / 1_000_000_000;
    cmp::min(coarse.saturating_add(fine), u32::MAX as u64) as u32
}

/// Inverse of [`encode_delay_since_last_sr`].
#[must_use]
pub fn decode_delay_since_last_sr(value: u32) -> Duration {
    let secs = value as u64 / 65_536;
    let remainder = value as u64 % 65_536;
    let nanos = (remainder * 1_000_000_000) / 65_536;
    Duration::new(secs, nanos as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock;
    impl RtpClock for FixedClock {
        fn to_rtp_timestamp(&self, _ntp: &NtpTime) -> u32 {
            90_000
        }
    }

    #[test]
    fn build_rr_copies_reports() {
        let reports = vec![ReceptionStatistics {
            source_ssrc: 0xB,
            fraction_lost: 0,
            cumulative_lost: 0,
            extended_highest_sequence: 10,
            interarrival_jitter: 0,
            last_sr: None,
            delay_since_last_sr: None,
        }];
        let stats = ReceiverStatistics {
            reporter_ssrc: 1,
            reports: &reports,
            profile_extensions: &[],
        };
        let mut out = Vec::new();
        build_rr(&stats, &mut out);
        match &out[0] {
            RtcpPacket::ReceiverReport(rr) => {
                assert_eq!(rr.reports[0].source_ssrc, 0xB);
                assert_eq!(rr.reports[0].extended_highest_sequence, 10);
            }
            _ => panic!("expected receiver report"),
        }
    }

    #[test]
    fn cumulative_lost_clamps() {
        assert_eq!(clamp_cumulative_lost(i32::MAX), MAX_CUMULATIVE_LOST);
        assert_eq!(clamp_cumulative_lost(i32::MIN), MIN_CUMULATIVE_LOST);
    }

    #[test]
    fn ntp_packed_round_trips() {
        let ntp = NtpTime::from_parts(3_000_000_000, 0x1234_5678);
        assert_eq!(NtpTime::from_u64(ntp.as_u64()), ntp);
    }

    #[test]
    fn delay_since_last_sr_round_trips_within_a_tick() {
        let delay = Duration::from_millis(1500);
        let decoded = decode_delay_since_last_sr(encode_delay_since_last_sr(delay));
        let diff = if decoded > delay { decoded - delay } else { delay - decoded };
        assert!(diff < Duration::from_micros(20));
    }

    #[test]
    fn build_sr_uses_clock_when_no_override() {
        let mut out = Vec::new();
        let stats = SenderStatistics {
            sender_ssrc: 1,
            capture_ntp: NtpTime::from_parts(1, 0),
            rtp_timestamp_override: None,
            sender_packet_count: 5,
            sender_octet_count: 500,
            reports: &[],
            profile_extensions: &[],
        };
        build_sr(&FixedClock, &stats, &mut out);
        match &out[0] {
            RtcpPacket::SenderReport(sr) => assert_eq!(sr.sender_info.rtp_timestamp, 90_000),
            _ => panic!("expected sender report"),
        }
    }
}
