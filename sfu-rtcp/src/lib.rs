pub mod error;
pub mod feedback;
pub mod packet;
pub mod parse;
pub mod stats;

pub use error::{RtcpEncodeError, RtcpParseError};
pub use feedback::{
    FirEntry, FullIntraRequest, GenericNack, NackBlock, PictureLossIndication,
    ReceiverEstimatedMaxBitrate, TccPacketStatus, TransportCcFeedback,
};
pub use packet::{
    Goodbye, ReceiverReport, ReceptionReport, RtcpPacket, SdesChunk, SdesItem, SenderInfo,
    SenderReport, SourceDescription,
};
pub use parse::{encode_packet, parse_packet, split_compound};
pub use stats::{
    build_rr, build_sr, clamp_cumulative_lost, decode_delay_since_last_sr,
    encode_delay_since_last_sr, NtpTime, ReceiverStatistics, ReceptionStatistics, RtpClock,
    SenderStatistics,
};
