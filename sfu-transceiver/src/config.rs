//! `TransceiverConfig` (A3): a builder plus immutable snapshot, following
//! the reference crate's configuration-builder idiom scoped down to a
//! single snapshot since this engine has no hot-reload requirement.

use std::time::Duration;

/// Tunables for one [`crate::transceiver::Transceiver`] instance. Every
/// field has a documented default, so a transceiver can be built with zero
/// configuration in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverConfig {
    /// Delay before `RetransmissionRequester` emits a NACK for a detected
    /// gap. Open Question (a): not specified upstream, defaulted to 20ms.
    pub nack_delay: Duration,
    /// Cadence of transport-wide-cc feedback generation. Open Question (a):
    /// defaulted to 20ms alongside `nack_delay`.
    pub tcc_feedback_interval: Duration,
    /// Cadence of the periodic Receiver Report generator. RFC 3550's
    /// minimum-interval guidance and scenario 4's 2s observation window
    /// both tolerate this default.
    pub rr_interval: Duration,
    /// Bound on the incoming packet queue `handleIncomingPacket` enqueues into.
    pub incoming_queue_capacity: usize,
    /// Bound on the outgoing packet queue the send pipeline's terminal node
    /// drains from.
    pub outgoing_queue_capacity: usize,
    /// How long a worker thread blocks on its queue before re-checking the
    /// running flag; bounds `stop()` latency.
    pub worker_poll_timeout: Duration,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            nack_delay: Duration::from_millis(20),
            tcc_feedback_interval: Duration::from_millis(20),
            rr_interval: Duration::from_secs(1),
            incoming_queue_capacity: 1024,
            outgoing_queue_capacity: 1024,
            worker_poll_timeout: Duration::from_millis(100),
        }
    }
}

impl TransceiverConfig {
    #[must_use]
    pub fn builder() -> TransceiverConfigBuilder {
        TransceiverConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransceiverConfigBuilder {
    nack_delay: Option<Duration>,
    tcc_feedback_interval: Option<Duration>,
    rr_interval: Option<Duration>,
    incoming_queue_capacity: Option<usize>,
    outgoing_queue_capacity: Option<usize>,
    worker_poll_timeout: Option<Duration>,
}

impl TransceiverConfigBuilder {
    #[must_use]
    pub fn nack_delay(mut self, value: Duration) -> Self {
        self.nack_delay = Some(value);
        self
    }

    #[must_use]
    pub fn tcc_feedback_interval(mut self, value: Duration) -> Self {
        self.tcc_feedback_interval = Some(value);
        self
    }

    #[must_use]
    pub fn rr_interval(mut self, value: Duration) -> Self {
        self.rr_interval = Some(value);
        self
    }

    #[must_use]
    pub fn incoming_queue_capacity(mut self, value: usize) -> Self {
        self.incoming_queue_capacity = Some(value);
        self
    }

    #[must_use]
    pub fn outgoing_queue_capacity(mut self, value: usize) -> Self {
        self.outgoing_queue_capacity = Some(value);
        self
    }

    #[must_use]
    pub fn worker_poll_timeout(mut self, value: Duration) -> Self {
        self.worker_poll_timeout = Some(value);
        self
    }

    #[must_use]
    pub fn build(self) -> TransceiverConfig {
        let defaults = TransceiverConfig::default();
        TransceiverConfig {
            nack_delay: self.nack_delay.unwrap_or(defaults.nack_delay),
            tcc_feedback_interval: self.tcc_feedback_interval.unwrap_or(defaults.tcc_feedback_interval),
            rr_interval: self.rr_interval.unwrap_or(defaults.rr_interval),
            incoming_queue_capacity: self.incoming_queue_capacity.unwrap_or(defaults.incoming_queue_capacity),
            outgoing_queue_capacity: self.outgoing_queue_capacity.unwrap_or(defaults.outgoing_queue_capacity),
            worker_poll_timeout: self.worker_poll_timeout.unwrap_or(defaults.worker_poll_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_configuration_build_uses_documented_defaults() {
        let cfg = TransceiverConfig::builder().build();
        assert_eq!(cfg.nack_delay, Duration::from_millis(20));
        assert_eq!(cfg.rr_interval, Duration::from_secs(1));
    }

    #[test]
    fn builder_overrides_only_set_fields() {
        let cfg = TransceiverConfig::builder().nack_delay(Duration::from_millis(5)).build();
        assert_eq!(cfg.nack_delay, Duration::from_millis(5));
        assert_eq!(cfg.tcc_feedback_interval, Duration::from_millis(20));
    }
}
