use thiserror::Error;

/// Failure modes when reinterpreting a buffer as an RTP packet.
///
/// Every variant corresponds to a malformed-input case from RFC 3550 §5.1;
/// callers treat all of them as "drop and count", never as a propagated panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtpParseError {
    #[error("RTP header shorter than the fixed 12-byte minimum")]
    HeaderTooShort,
    #[error("unsupported RTP version {0} (only version 2 is accepted)")]
    UnsupportedVersion(u8),
    #[error("CSRC count exceeds 15 or the buffer is too short for the declared count")]
    InvalidCsrcLength,
    #[error("header extension length field disagrees with the remaining buffer")]
    InvalidExtension,
    #[error("padding bit set but the trailing pad-length byte is zero or too large")]
    InvalidPadding,
}

/// Failure modes when serializing an [`crate::header::RtpPacketBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtpEncodeError {
    #[error("destination buffer too small for the encoded packet")]
    BufferTooSmall,
    #[error("header field inconsistent with extension/padding configuration: {0}")]
    HeaderMismatch(&'static str),
    #[error("invalid field value: {0}")]
    InvalidField(&'static str),
}
