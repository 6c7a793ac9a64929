use thiserror::Error;

/// Failure modes when reinterpreting a buffer as an RTCP packet, or as the
/// compound sequence of RTCP packets RFC 3550 §6.1 mandates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtcpParseError {
    #[error("RTCP header shorter than the fixed 4-byte minimum")]
    HeaderTooShort,
    #[error("unsupported RTCP version {0} (only version 2 is accepted)")]
    UnsupportedVersion(u8),
    #[error("declared packet length extends past the end of the buffer")]
    LengthOutOfBounds,
    #[error("packet type {0} is not recognized")]
    UnknownPacketType(u8),
    #[error("feedback message format {0} is not recognized for packet type {1}")]
    UnknownFeedbackFormat(u8, u8),
    #[error("report count/length field is inconsistent with the buffer contents")]
    MalformedReportBlock,
    #[error("SDES item value is declared longer than the remaining chunk bytes")]
    MalformedSdesItem,
}

/// Failure modes when encoding an RTCP packet to wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtcpEncodeError {
    #[error("field count exceeds the protocol's representable range: {0}")]
    CountOutOfRange(&'static str),
    #[error("profile-specific extension length must be a multiple of 4 bytes")]
    UnalignedExtension,
}
