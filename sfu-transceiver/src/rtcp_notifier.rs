//! `RtcpEventNotifier` (C8): a pub/sub for parsed RTCP events. `RTCPTermination`
//! is the only publisher (ingress); subscribers are the RR generator (via
//! `IncomingStatsTable::note_sender_report`), [`crate::rtt::ConnectionStats`]
//! (RTT from SR/RR pairs), and the transport-CC engine's installed
//! [`crate::tcc::BandwidthEstimatorSink`].

use parking_lot::RwLock;
use sfu_rtcp::RtcpPacket;

/// Receives every locally relevant RTCP packet the transceiver observes.
pub trait RtcpSubscriber: Send + Sync {
    fn on_rtcp(&self, packet: &RtcpPacket);
}

#[derive(Default)]
pub struct RtcpEventNotifier {
    subscribers: RwLock<Vec<Box<dyn RtcpSubscriber>>>,
}

impl RtcpEventNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Box<dyn RtcpSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Synchronous fan-out: every subscriber observes `packet` before this
    /// call returns, matching the event bus's synchronous-delivery
    /// guarantee (§5).
    pub fn publish(&self, packet: &RtcpPacket) {
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_rtcp(packet);
        }
    }
}
