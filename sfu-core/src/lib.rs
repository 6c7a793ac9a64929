pub mod builder;
pub mod demux;
pub mod error;
pub mod event;
pub mod node;
pub mod packet_info;
pub mod stats;

pub use builder::{DemuxerBuilder, PipelineBuilder, SimpleNode};
pub use demux::{ConditionalPacketPath, DemuxerNode};
pub use error::PipelineError;
pub use event::{broadcast_event, AssociationKind, Event, MediaFormat, RtpEncoding};
pub use node::{into_linked_arc, reverse_visit, visit, Node, NodeCore, NodeStatsSnapshot};
pub use packet_info::{PacketInfo, PacketKind, VideoFrameMeta, VideoRtpPacket};
pub use stats::{collect_stats, NodeStatsBlock};
