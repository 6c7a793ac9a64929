//! Per-endpoint SRTP/SRTCP transceiver: a receive pipeline (C6), a send
//! pipeline (C7), the RTCP subsystem built on top of `sfu-rtcp` (C8), and
//! the `Transceiver` object (C9) that owns both plus the worker threads
//! driving them.

pub mod callback;
pub mod config;
pub mod error;
pub mod nack;
pub mod nodes;
pub mod receive;
pub mod rtcp_notifier;
pub mod rtt;
pub mod send;
pub mod stat_tracker;
pub mod state;
pub mod tcc;
pub mod transceiver;
pub mod transform;

pub use callback::{AudioLevelListener, PacketHandler, RtcpSender};
pub use config::{TransceiverConfig, TransceiverConfigBuilder};
pub use error::TransceiverError;
pub use nack::RetransmissionTracker;
pub use receive::ReceivePipeline;
pub use rtcp_notifier::{RtcpEventNotifier, RtcpSubscriber};
pub use rtt::ConnectionStats;
pub use send::SendPipeline;
pub use stat_tracker::IncomingStatsTable;
pub use state::TransceiverState;
pub use tcc::{BandwidthEstimatorSink, TransportCcGenerator};
pub use transceiver::Transceiver;
pub use transform::{
    DtlsContext, IdentityTransformer, PacketTransformer, SrtpKeyingMaterial, SrtpProfile, SrtpTransformerFactory,
    Vp8Depacketizer,
};
