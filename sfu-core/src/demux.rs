//! [`DemuxerNode`]: routes each packet to the first branch whose predicate
//! matches, rather than forwarding to a single `next`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::PipelineError;
use crate::node::{Node, NodeCore};
use crate::packet_info::PacketInfo;

/// One branch of a demuxer: a name for diagnostics, a predicate, and the
/// root of the sub-pipeline packets matching it are routed into.
pub struct ConditionalPacketPath {
    pub name: String,
    predicate: Box<dyn Fn(&PacketInfo) -> bool + Send + Sync>,
    head: Arc<dyn Node>,
}

impl ConditionalPacketPath {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&PacketInfo) -> bool + Send + Sync + 'static,
        head: Arc<dyn Node>,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            head,
        }
    }
}

/// A node with an ordered list of [`ConditionalPacketPath`]s instead of a
/// single successor. `attach()` always fails here — routing is declared at
/// construction time through [`crate::builder::DemuxerBuilder::path`].
pub struct DemuxerNode {
    core: NodeCore,
    paths: Vec<ConditionalPacketPath>,
    drop_counter: AtomicU64,
}

impl DemuxerNode {
    #[must_use]
    pub fn new(name: impl Into<String>, paths: Vec<ConditionalPacketPath>) -> Self {
        Self {
            core: NodeCore::new(name),
            paths,
            drop_counter: AtomicU64::new(0),
        }
    }
}

impl Node for DemuxerNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    /// Routes each packet individually: the first matching path's head gets
    /// its own single-packet batch, preserving per-path ordering. Unmatched
    /// packets are dropped and counted. Never returns anything itself —
    /// a demuxer has no `next` for `emit` to forward to.
    fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
        for info in batch {
            match self.paths.iter().find(|path| (path.predicate)(&info)) {
                Some(path) => path.head.process_packets(vec![info]),
                None => {
                    self.drop_counter.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(node = self.core.name(), "demuxer dropped unmatched packet");
                }
            }
        }
        Vec::new()
    }

    fn attach(&self, _next: Arc<dyn Node>) -> Result<(), PipelineError> {
        Err(PipelineError::TopologyMisuse(self.core.name().to_string()))
    }

    fn branches(&self) -> Vec<Arc<dyn Node>> {
        self.paths.iter().map(|p| p.head.clone()).collect()
    }

    fn drop_count(&self) -> Option<u64> {
        Some(self.drop_counter.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::into_linked_arc;
    use crate::packet_info::PacketKind;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Instant;

    struct Sink {
        core: NodeCore,
        received: Arc<Mutex<Vec<String>>>,
    }
    impl Node for Sink {
        fn core(&self) -> &NodeCore {
            &self.core
        }
        fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
            for p in &batch {
                self.received.lock().unwrap().push(p.kind.label().to_string());
            }
            Vec::new()
        }
    }

    #[test]
    fn routes_to_first_matching_path_and_drops_unmatched() {
        let rtp_sink_log = Arc::new(Mutex::new(Vec::new()));
        let rtcp_sink_log = Arc::new(Mutex::new(Vec::new()));
        let rtp_sink = into_linked_arc(Sink {
            core: NodeCore::new("rtp-sink"),
            received: rtp_sink_log.clone(),
        });
        let rtcp_sink = into_linked_arc(Sink {
            core: NodeCore::new("rtcp-sink"),
            received: rtcp_sink_log.clone(),
        });

        let demux = into_linked_arc(DemuxerNode::new(
            "proto-demux",
            vec![
                ConditionalPacketPath::new(
                    "rtp",
                    |p| matches!(p.kind, PacketKind::Srtp(_)),
                    rtp_sink,
                ),
                ConditionalPacketPath::new(
                    "rtcp",
                    |p| matches!(p.kind, PacketKind::Srtcp(_)),
                    rtcp_sink,
                ),
            ],
        ));

        let now = Instant::now();
        demux.process_packets(vec![
            PacketInfo::new(PacketKind::Srtp(Bytes::from_static(b"a")), now),
            PacketInfo::new(PacketKind::Srtcp(Bytes::from_static(b"b")), now),
            PacketInfo::new(PacketKind::Raw(Bytes::from_static(b"c")), now),
        ]);

        assert_eq!(*rtp_sink_log.lock().unwrap(), vec!["srtp".to_string()]);
        assert_eq!(*rtcp_sink_log.lock().unwrap(), vec!["srtcp".to_string()]);
        assert_eq!(demux.drop_count(), Some(1));
    }

    #[test]
    fn attach_on_demuxer_is_topology_misuse() {
        let demux = into_linked_arc(DemuxerNode::new("d", Vec::new()));
        let other = into_linked_arc(Sink {
            core: NodeCore::new("s"),
            received: Arc::new(Mutex::new(Vec::new())),
        });
        assert!(matches!(demux.attach(other), Err(PipelineError::TopologyMisuse(_))));
    }

    #[tracing_test::traced_test]
    #[test]
    fn unmatched_packet_drop_is_logged() {
        let demux = into_linked_arc(DemuxerNode::new("proto-demux", Vec::new()));
        demux.process_packets(vec![PacketInfo::new(
            PacketKind::Raw(Bytes::from_static(b"c")),
            Instant::now(),
        )]);
        assert!(logs_contain("demuxer dropped unmatched packet"));
    }
}
