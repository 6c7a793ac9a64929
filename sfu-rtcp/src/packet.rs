//! Structured data model for parsed RTCP packets.
//!
//! These types are parse/build products; they carry no behavior of their
//! own. RFC 3550 packet types (SR/RR/SDES/BYE) are modeled directly; feedback
//! packet types (NACK/PLI/FIR/TCC/REMB, RFC 4585/5104/8888-draft) live in
//! [`crate::feedback`] and are folded into [`RtcpPacket`] here.

use crate::feedback::{
    FullIntraRequest, GenericNack, PictureLossIndication, ReceiverEstimatedMaxBitrate,
    TransportCcFeedback,
};

/// Sender-side statistics block fixed at the front of a Sender Report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    /// 64-bit NTP timestamp (32-bit seconds, 32-bit fraction).
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
}

/// One reception report block, found in both SR and RR packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    pub source_ssrc: u32,
    pub fraction_lost: u8,
    /// 24-bit signed cumulative loss count.
    pub cumulative_lost: i32,
    pub extended_highest_sequence: u32,
    pub interarrival_jitter: u32,
    pub last_sr_timestamp: u32,
    pub delay_since_last_sr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub sender_ssrc: u32,
    pub sender_info: SenderInfo,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub reporter_ssrc: u32,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub item_type: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub source: u32,
    pub items: Vec<SdesItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescription {
    pub chunks: Vec<SdesChunk>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

/// Every RTCP packet kind this engine terminates or forwards (§4.4/§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription(SourceDescription),
    Goodbye(Goodbye),
    Nack(GenericNack),
    Pli(PictureLossIndication),
    Fir(FullIntraRequest),
    TransportCc(TransportCcFeedback),
    Remb(ReceiverEstimatedMaxBitrate),
}

impl RtcpPacket {
    /// Human-readable kind tag, used in stats/observability, not on the wire.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SenderReport(_) => "sender_report",
            Self::ReceiverReport(_) => "receiver_report",
            Self::SourceDescription(_) => "sdes",
            Self::Goodbye(_) => "bye",
            Self::Nack(_) => "nack",
            Self::Pli(_) => "pli",
            Self::Fir(_) => "fir",
            Self::TransportCc(_) => "transport_cc",
            Self::Remb(_) => "remb",
        }
    }

    /// The reception report blocks carried by this packet, if any. Both SR
    /// and RR carry them; every other kind carries none.
    #[must_use]
    pub fn reception_reports(&self) -> &[ReceptionReport] {
        match self {
            Self::SenderReport(sr) => &sr.reports,
            Self::ReceiverReport(rr) => &rr.reports,
            _ => &[],
        }
    }
}
