//! RTP header/packet parsing, building, and header-extension readers.
//!
//! This crate is deliberately narrow: it owns RFC 3550 wire format and the
//! two RFC 8285 extensions this engine reads directly (audio level, TCC
//! sequence number). VP8 payload-descriptor parsing and SRTP/SRTCP crypto
//! are external collaborators and live outside this crate.

pub mod error;
pub mod extensions;
pub mod header;

pub use error::{RtpEncodeError, RtpParseError};
pub use header::{
    parse_rtp, seq_diff, seq_less, RtpHeader, RtpHeaderExtension, RtpPacket, RtpPacketBuilder,
    MAX_CSRC_COUNT, RTP_HEADER_MIN_LEN, RTP_VERSION,
};
