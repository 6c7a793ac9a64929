//! Declarative pipeline construction (C3): fluent linear chaining plus a
//! `demux` block for predicate-routed branches.

use std::sync::Arc;

use crate::demux::{ConditionalPacketPath, DemuxerNode};
use crate::node::{into_linked_arc, Node, NodeCore};
use crate::packet_info::PacketInfo;

/// A one-shot stateless transformer: maps a packet to zero-or-one packets.
/// The `simpleNode(name, fn)` builder primitive.
pub struct SimpleNode<F> {
    core: NodeCore,
    transform: F,
}

impl<F> SimpleNode<F>
where
    F: Fn(PacketInfo) -> Option<PacketInfo> + Send + Sync,
{
    pub fn new(name: impl Into<String>, transform: F) -> Self {
        Self {
            core: NodeCore::new(name),
            transform,
        }
    }
}

impl<F> Node for SimpleNode<F>
where
    F: Fn(PacketInfo) -> Option<PacketInfo> + Send + Sync + 'static,
{
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
        batch.into_iter().filter_map(|p| (self.transform)(p)).collect()
    }
}

/// Builds a linear chain (with optional `demux` branch points) and yields
/// its root node. Left-folds a sequence of `node()` calls over a "current
/// tail" pointer, `attach`-ing each new node onto the previous one.
#[derive(Default)]
pub struct PipelineBuilder {
    root: Option<Arc<dyn Node>>,
    tail: Option<Arc<dyn Node>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { root: None, tail: None }
    }

    /// Appends an already-constructed node, attaching it to the current
    /// tail (or making it the root, if this is the first call).
    #[must_use]
    pub fn node(mut self, node: Arc<dyn Node>) -> Self {
        if let Some(tail) = &self.tail {
            tail.attach(node.clone()).expect("builder never attaches onto a demuxer");
        } else {
            self.root = Some(node.clone());
        }
        self.tail = Some(node);
        self
    }

    #[must_use]
    pub fn simple_node<F>(self, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(PacketInfo) -> Option<PacketInfo> + Send + Sync + 'static,
    {
        self.node(into_linked_arc(SimpleNode::new(name, transform)))
    }

    /// Appends a demuxer. `build` receives a fresh [`DemuxerBuilder`] and
    /// must register every branch via [`DemuxerBuilder::path`].
    #[must_use]
    pub fn demux(self, name: impl Into<String>, build: impl FnOnce(DemuxerBuilder) -> DemuxerBuilder) -> Self {
        let demuxer = build(DemuxerBuilder::new(name)).finish();
        self.node(into_linked_arc(demuxer))
    }

    /// Finalizes the graph, returning its root. Panics if no node was ever
    /// added — an empty pipeline is a construction-time programming error.
    #[must_use]
    pub fn build(self) -> Arc<dyn Node> {
        self.root.expect("pipeline must contain at least one node")
    }
}

/// Accumulates a demuxer's branches. Each [`path`](Self::path) call builds
/// its own sub-pipeline via a nested [`PipelineBuilder`].
pub struct DemuxerBuilder {
    name: String,
    paths: Vec<ConditionalPacketPath>,
}

impl DemuxerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
        }
    }

    #[must_use]
    pub fn path<F>(
        mut self,
        name: impl Into<String>,
        predicate: F,
        build: impl FnOnce(PipelineBuilder) -> PipelineBuilder,
    ) -> Self
    where
        F: Fn(&PacketInfo) -> bool + Send + Sync + 'static,
    {
        let head = build(PipelineBuilder::new()).build();
        self.paths.push(ConditionalPacketPath::new(name, predicate, head));
        self
    }

    fn finish(self) -> DemuxerNode {
        DemuxerNode::new(self.name, self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_info::PacketKind;
    use bytes::Bytes;
    use std::sync::{Arc as StdArc, Mutex};
    use std::time::Instant;

    #[test]
    fn linear_chain_forwards_through_every_node() {
        let log = StdArc::new(Mutex::new(Vec::new()));
        let log1 = log.clone();
        let log2 = log.clone();
        let root = PipelineBuilder::new()
            .simple_node("uppercase-marker", move |p| {
                log1.lock().unwrap().push("a".to_string());
                Some(p)
            })
            .simple_node("second", move |p| {
                log2.lock().unwrap().push("b".to_string());
                Some(p)
            })
            .build();

        root.process_packets(vec![PacketInfo::new(
            PacketKind::Raw(Bytes::from_static(b"x")),
            Instant::now(),
        )]);

        assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn demux_routes_by_predicate() {
        let audio_hits = StdArc::new(Mutex::new(0u32));
        let video_hits = StdArc::new(Mutex::new(0u32));
        let a = audio_hits.clone();
        let v = video_hits.clone();

        let root = PipelineBuilder::new()
            .demux("media-type", move |d| {
                d.path(
                    "audio",
                    |p| matches!(p.kind, PacketKind::Audio(_)),
                    move |b| {
                        let a = a.clone();
                        b.simple_node("audio-sink", move |p| {
                            *a.lock().unwrap() += 1;
                            Some(p)
                        })
                    },
                )
                .path(
                    "video",
                    |p| matches!(p.kind, PacketKind::Video(_)),
                    move |b| {
                        let v = v.clone();
                        b.simple_node("video-sink", move |p| {
                            *v.lock().unwrap() += 1;
                            Some(p)
                        })
                    },
                )
            })
            .build();

        let now = Instant::now();
        // A real packet must actually parse as RTP to construct an Audio/Video
        // variant; here we only exercise demuxer routing via Raw, which matches
        // neither path and should be dropped.
        root.process_packets(vec![PacketInfo::new(PacketKind::Raw(Bytes::from_static(b"x")), now)]);

        assert_eq!(*audio_hits.lock().unwrap(), 0);
        assert_eq!(*video_hits.lock().unwrap(), 0);
    }
}
