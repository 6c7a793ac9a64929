//! RTCP feedback packet types: generic NACK (RFC 4585 §6.2.1), PLI/FIR
//! (RFC 4585 §6.3.1, RFC 5104 §4.3.1), REMB (draft-alvestrand-rmcat-remb),
//! and transport-wide congestion control feedback
//! (draft-holmer-rmcat-transport-wide-cc-extensions).
//!
//! RTCP feedback packets share one header shape: the 4-byte common RTCP
//! header (version/padding/FMT, packet type, length) followed by a 4-byte
//! sender SSRC and a 4-byte media-source SSRC, followed by format-specific
//! feedback control information (FCI). Header framing and compound-packet
//! splitting live in [`crate::parse`]; this module owns only the FCI shape.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RtcpEncodeError, RtcpParseError};

/// Transport-layer feedback: payload type 205.
pub const PT_RTPFB: u8 = 205;
/// Payload-specific feedback: payload type 206.
pub const PT_PSFB: u8 = 206;

/// RTPFB FMT=1: generic NACK (RFC 4585 §6.2.1).
pub const FMT_GENERIC_NACK: u8 = 1;
/// RTPFB FMT=15: transport-wide congestion control feedback.
pub const FMT_TRANSPORT_CC: u8 = 15;
/// PSFB FMT=1: Picture Loss Indication.
pub const FMT_PLI: u8 = 1;
/// PSFB FMT=4: Full Intra Request (RFC 5104).
pub const FMT_FIR: u8 = 4;
/// PSFB FMT=15: application layer feedback (REMB rides on this as "AFB").
pub const FMT_AFB: u8 = 15;

const REMB_UNIQUE_IDENTIFIER: [u8; 4] = *b"REMB";

/// One lost-packet bitmask entry: packet `pid` is lost, and bit `i` set in
/// `blp` marks `pid + i + 1` as also lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackBlock {
    pub pid: u16,
    pub blp: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<NackBlock>,
}

impl GenericNack {
    pub fn parse_fci(sender_ssrc: u32, media_ssrc: u32, mut fci: Bytes) -> Result<Self, RtcpParseError> {
        if fci.len() % 4 != 0 {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let mut entries = Vec::with_capacity(fci.len() / 4);
        while fci.has_remaining() {
            if fci.remaining() < 4 {
                return Err(RtcpParseError::MalformedReportBlock);
            }
            let pid = fci.get_u16();
            let blp = fci.get_u16();
            entries.push(NackBlock { pid, blp });
        }
        Ok(Self {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }

    pub fn encode_fci(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            buf.put_u16(entry.pid);
            buf.put_u16(entry.blp);
        }
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirEntry {
    pub ssrc: u32,
    pub seq_nr: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<FirEntry>,
}

impl FullIntraRequest {
    pub fn parse_fci(sender_ssrc: u32, media_ssrc: u32, mut fci: Bytes) -> Result<Self, RtcpParseError> {
        if fci.len() % 8 != 0 {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let mut entries = Vec::with_capacity(fci.len() / 8);
        while fci.has_remaining() {
            if fci.remaining() < 8 {
                return Err(RtcpParseError::MalformedReportBlock);
            }
            let ssrc = fci.get_u32();
            let seq_nr = fci.get_u8();
            fci.advance(3); // reserved
            entries.push(FirEntry { ssrc, seq_nr });
        }
        Ok(Self {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }

    pub fn encode_fci(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.entries.len() * 8);
        for entry in &self.entries {
            buf.put_u32(entry.ssrc);
            buf.put_u8(entry.seq_nr);
            buf.put_bytes(0, 3);
        }
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverEstimatedMaxBitrate {
    pub sender_ssrc: u32,
    pub ssrcs: Vec<u32>,
    pub bitrate_bps: u64,
}

impl ReceiverEstimatedMaxBitrate {
    pub fn parse_fci(sender_ssrc: u32, _media_ssrc: u32, mut fci: Bytes) -> Result<Self, RtcpParseError> {
        if fci.remaining() < 8 {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let mut identifier = [0u8; 4];
        fci.copy_to_slice(&mut identifier);
        if identifier != REMB_UNIQUE_IDENTIFIER {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let num_ssrc = fci.get_u8() as usize;
        let exp_mantissa = [fci.get_u8(), fci.get_u8(), fci.get_u8()];
        let exponent = exp_mantissa[0] >> 2;
        let mantissa = (((exp_mantissa[0] & 0x03) as u32) << 16)
            | ((exp_mantissa[1] as u32) << 8)
            | exp_mantissa[2] as u32;
        let bitrate_bps = (mantissa as u64) << exponent;

        if fci.remaining() < num_ssrc * 4 {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let mut ssrcs = Vec::with_capacity(num_ssrc);
        for _ in 0..num_ssrc {
            ssrcs.push(fci.get_u32());
        }
        Ok(Self {
            sender_ssrc,
            ssrcs,
            bitrate_bps,
        })
    }

    pub fn encode_fci(&self) -> Result<Bytes, RtcpEncodeError> {
        if self.ssrcs.len() > u8::MAX as usize {
            return Err(RtcpEncodeError::CountOutOfRange("remb.ssrcs"));
        }
        // Find the largest exponent such that mantissa fits in 18 bits.
        let mut exponent: u8 = 0;
        let mut mantissa = self.bitrate_bps;
        while mantissa > 0x3_FFFF && exponent < 63 {
            mantissa >>= 1;
            exponent += 1;
        }
        let mut buf = BytesMut::with_capacity(8 + self.ssrcs.len() * 4);
        buf.put_slice(&REMB_UNIQUE_IDENTIFIER);
        buf.put_u8(self.ssrcs.len() as u8);
        buf.put_u8((exponent << 2) | ((mantissa >> 16) as u8 & 0x03));
        buf.put_u8((mantissa >> 8) as u8);
        buf.put_u8(mantissa as u8);
        for ssrc in &self.ssrcs {
            buf.put_u32(*ssrc);
        }
        Ok(buf.freeze())
    }
}

/// One observed packet's transport-wide-cc arrival status: a 16-bit
/// transport sequence number plus an optional arrival delta in 250us ticks
/// (`None` means "not received").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TccPacketStatus {
    pub sequence_number: u16,
    pub delta_250us: Option<i16>,
}

/// Transport-wide congestion control feedback.
///
/// This models the subset of draft-holmer-rmcat-transport-wide-cc-extensions
/// this engine needs to *generate*: one feedback packet covering a
/// contiguous transport sequence range, encoded with run-length chunks only
/// (every packet gets its own one-entry run). That is always RFC-legal, just
/// less compact than the general chunk grammar; bandwidth-estimation policy
/// that would benefit from status-vector chunking is explicitly out of
/// scope (§1 Non-goals) for this engine, which only hosts the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCcFeedback {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub fb_pkt_count: u8,
    pub base_sequence: u16,
    pub reference_time_64us: i32,
    pub packets: Vec<TccPacketStatus>,
}

const CHUNK_STATUS_NOT_RECEIVED: u16 = 0;
const CHUNK_STATUS_SMALL_DELTA: u16 = 1;
const CHUNK_STATUS_LARGE_DELTA: u16 = 2;

impl TransportCcFeedback {
    pub fn encode_fci(&self) -> Result<Bytes, RtcpEncodeError> {
        if self.packets.len() > 0xFFFF {
            return Err(RtcpEncodeError::CountOutOfRange("transport_cc.packets"));
        }
        let mut buf = BytesMut::new();
        buf.put_u16(self.base_sequence);
        buf.put_u16(self.packets.len() as u16);
        // 24-bit signed reference time followed by the 8-bit feedback packet count.
        let ref_bytes = self.reference_time_64us.to_be_bytes();
        buf.put_slice(&ref_bytes[1..4]);
        buf.put_u8(self.fb_pkt_count);

        for status in &self.packets {
            let symbol = match status.delta_250us {
                None => CHUNK_STATUS_NOT_RECEIVED,
                Some(d) if (i8::MIN as i16..=i8::MAX as i16).contains(&d) => CHUNK_STATUS_SMALL_DELTA,
                Some(_) => CHUNK_STATUS_LARGE_DELTA,
            };
            // Run-length chunk: T=0, symbol(2 bits), run length(13 bits)=1.
            let chunk: u16 = (symbol & 0x3) << 13 | 1;
            buf.put_u16(chunk);
            match status.delta_250us {
                None => {}
                Some(d) if symbol == CHUNK_STATUS_SMALL_DELTA => buf.put_i8(d as i8),
                Some(d) => buf.put_i16(d),
            }
        }
        // Pad to a 32-bit boundary.
        while buf.len() % 4 != 0 {
            buf.put_u8(0);
        }
        Ok(buf.freeze())
    }

    /// Parses only the run-length-chunk subset this engine generates.
    /// Status-vector chunks (`T=1`) are not emitted by [`Self::encode_fci`]
    /// and are rejected here rather than silently misinterpreted.
    pub fn parse_fci(sender_ssrc: u32, media_ssrc: u32, mut fci: Bytes) -> Result<Self, RtcpParseError> {
        if fci.remaining() < 8 {
            return Err(RtcpParseError::MalformedReportBlock);
        }
        let base_sequence = fci.get_u16();
        let packet_status_count = fci.get_u16();
        let mut ref_bytes = [0u8; 4];
        ref_bytes[1] = fci.get_u8();
        ref_bytes[2] = fci.get_u8();
        ref_bytes[3] = fci.get_u8();
        if ref_bytes[1] & 0x80 != 0 {
            ref_bytes[0] = 0xff; // sign-extend the 24-bit field
        }
        let reference_time_64us = i32::from_be_bytes(ref_bytes);
        let fb_pkt_count = fci.get_u8();

        let mut packets = Vec::with_capacity(packet_status_count as usize);
        while packets.len() < packet_status_count as usize {
            if fci.remaining() < 2 {
                return Err(RtcpParseError::MalformedReportBlock);
            }
            let chunk = fci.get_u16();
            if chunk & 0x8000 != 0 {
                return Err(RtcpParseError::MalformedReportBlock); // status-vector chunk, unsupported
            }
            let symbol = (chunk >> 13) & 0x3;
            let run_length = (chunk & 0x1FFF) as usize;
            for _ in 0..run_length {
                if packets.len() >= packet_status_count as usize {
                    break;
                }
                let delta = match symbol {
                    CHUNK_STATUS_NOT_RECEIVED => None,
                    CHUNK_STATUS_SMALL_DELTA => {
                        if fci.remaining() < 1 {
                            return Err(RtcpParseError::MalformedReportBlock);
                        }
                        Some(fci.get_i8() as i16)
                    }
                    CHUNK_STATUS_LARGE_DELTA => {
                        if fci.remaining() < 2 {
                            return Err(RtcpParseError::MalformedReportBlock);
                        }
                        Some(fci.get_i16())
                    }
                    _ => return Err(RtcpParseError::MalformedReportBlock),
                };
                packets.push(TccPacketStatus {
                    sequence_number: base_sequence.wrapping_add(packets.len() as u16),
                    delta_250us: delta,
                });
            }
        }

        Ok(Self {
            sender_ssrc,
            media_ssrc,
            fb_pkt_count,
            base_sequence,
            reference_time_64us,
            packets,
        })
    }
}
