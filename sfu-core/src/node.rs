//! The [`Node`] trait and its shared bookkeeping state [`NodeCore`].
//!
//! Mirrors a template-method split: `process_packets`/`emit`/`attach` are
//! base-class behavior with default bodies that every node shares; only
//! `do_process` is a required override. Time and byte accounting happen in
//! the base behavior so stats stay uniform no matter what a node does.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::PipelineError;
use crate::packet_info::PacketInfo;

/// Shared identity and bookkeeping state every concrete node embeds.
pub struct NodeCore {
    name: String,
    self_handle: RwLock<Weak<dyn Node>>,
    next: RwLock<Option<Arc<dyn Node>>>,
    inputs: RwLock<Vec<Weak<dyn Node>>>,
    num_input_packets: AtomicU64,
    num_output_packets: AtomicU64,
    num_bytes: AtomicU64,
    first_packet_time: RwLock<Option<Instant>>,
    last_packet_time: RwLock<Option<Instant>>,
    total_processing_nanos: AtomicU64,
}

/// A point-in-time copy of one node's stats counters.
#[derive(Debug, Clone, Copy)]
pub struct NodeStatsSnapshot {
    pub num_input_packets: u64,
    pub num_output_packets: u64,
    pub num_bytes: u64,
    pub total_processing_duration: Duration,
    /// `bytes / (last_packet_time - first_packet_time)`; `None` until two
    /// distinct timestamps have been observed.
    pub wall_clock_bytes_per_sec: Option<f64>,
    /// `bytes / total_processing_duration`.
    pub module_time_bytes_per_sec: Option<f64>,
}

impl NodeCore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let empty_handle: Weak<dyn Node> = Weak::<DummyNode>::new();
        Self {
            name: name.into(),
            self_handle: RwLock::new(empty_handle),
            next: RwLock::new(None),
            inputs: RwLock::new(Vec::new()),
            num_input_packets: AtomicU64::new(0),
            num_output_packets: AtomicU64::new(0),
            num_bytes: AtomicU64::new(0),
            first_packet_time: RwLock::new(None),
            last_packet_time: RwLock::new(None),
            total_processing_nanos: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Called once, immediately after the owning node is wrapped in an
    /// `Arc`, so `attach()` can register a back-edge on its successor.
    pub fn set_self_handle(&self, handle: Weak<dyn Node>) {
        *self.self_handle.write() = handle;
    }

    fn self_handle(&self) -> Weak<dyn Node> {
        self.self_handle.read().clone()
    }

    #[must_use]
    pub fn next(&self) -> Option<Arc<dyn Node>> {
        self.next.read().clone()
    }

    pub fn set_next(&self, next: Arc<dyn Node>) {
        *self.next.write() = Some(next);
    }

    pub fn add_input(&self, input: Weak<dyn Node>) {
        self.inputs.write().push(input);
    }

    #[must_use]
    pub fn inputs(&self) -> Vec<Arc<dyn Node>> {
        self.inputs.read().iter().filter_map(Weak::upgrade).collect()
    }

    fn record_input(&self, batch: &[PacketInfo]) {
        if batch.is_empty() {
            return;
        }
        self.num_input_packets.fetch_add(batch.len() as u64, Ordering::Relaxed);
        let bytes: u64 = batch.iter().map(|p| p.byte_len() as u64).sum();
        self.num_bytes.fetch_add(bytes, Ordering::Relaxed);
        let now = Instant::now();
        let mut first = self.first_packet_time.write();
        if first.is_none() {
            *first = Some(now);
        }
        *self.last_packet_time.write() = Some(now);
    }

    fn record_output(&self, batch: &[PacketInfo], entry: Instant) {
        self.num_output_packets.fetch_add(batch.len() as u64, Ordering::Relaxed);
        let elapsed = entry.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.total_processing_nanos.fetch_add(elapsed, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> NodeStatsSnapshot {
        let num_input_packets = self.num_input_packets.load(Ordering::Relaxed);
        let num_output_packets = self.num_output_packets.load(Ordering::Relaxed);
        let num_bytes = self.num_bytes.load(Ordering::Relaxed);
        let total_processing_duration = Duration::from_nanos(self.total_processing_nanos.load(Ordering::Relaxed));

        let wall_clock_bytes_per_sec = match (*self.first_packet_time.read(), *self.last_packet_time.read()) {
            (Some(first), Some(last)) if last > first => {
                Some(num_bytes as f64 / (last - first).as_secs_f64())
            }
            _ => None,
        };
        let module_time_bytes_per_sec = if total_processing_duration.is_zero() {
            None
        } else {
            Some(num_bytes as f64 / total_processing_duration.as_secs_f64())
        };

        NodeStatsSnapshot {
            num_input_packets,
            num_output_packets,
            num_bytes,
            total_processing_duration,
            wall_clock_bytes_per_sec,
            module_time_bytes_per_sec,
        }
    }
}

/// Placeholder type used only to give `Weak::<DummyNode>::new()` a concrete
/// type to coerce to `Weak<dyn Node>` before a real self-handle is set.
struct DummyNode;
impl Node for DummyNode {
    fn core(&self) -> &NodeCore {
        unreachable!("DummyNode is never attached to a pipeline")
    }
    fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
        batch
    }
}

/// One step in a packet-processing graph.
///
/// Object-safe by design (`dyn Node`) so pipelines are built from
/// heterogeneous concrete node types behind a common handle. Only
/// `do_process` is required; every other method has a default body driven
/// by [`NodeCore`] and is only overridden by nodes that change the
/// contract — chiefly [`crate::demux::DemuxerNode`], which forbids `attach`
/// and fans out through its own branch list instead of `next`.
pub trait Node: Send + Sync {
    fn core(&self) -> &NodeCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// The one required hook: consume a batch, return what should continue
    /// downstream. Returning fewer packets than received means "dropped
    /// some"; returning more means "fanned out" (e.g. compound RTCP split).
    fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo>;

    /// Entry point. Annotates each packet's timeline, records input stats,
    /// then delegates to `do_process` and forwards the result.
    fn process_packets(&self, mut batch: Vec<PacketInfo>) {
        let entry = Instant::now();
        let label = format!("Entered {}", self.name());
        for info in &mut batch {
            info.mark(label.clone());
        }
        self.core().record_input(&batch);
        let out = self.do_process(batch);
        self.emit(out, entry);
    }

    /// Protected egress: records output stats/duration, then forwards to
    /// `next` if bound. Nodes that need to target something other than
    /// `next` (none currently do; demuxers call `process_packets` on branch
    /// heads directly from `do_process`) would call this per-target.
    fn emit(&self, mut batch: Vec<PacketInfo>, entry: Instant) {
        if batch.is_empty() {
            self.core().record_output(&batch, entry);
            return;
        }
        let label = format!("Exited {}", self.name());
        for info in &mut batch {
            info.mark(label.clone());
        }
        self.core().record_output(&batch, entry);
        if let Some(next) = self.core().next() {
            next.process_packets(batch);
        }
    }

    /// Binds `next` as this node's successor, wiring the back-edge too.
    /// [`crate::demux::DemuxerNode`] overrides this to always fail.
    fn attach(&self, next: Arc<dyn Node>) -> Result<(), PipelineError> {
        next.core().add_input(self.core().self_handle());
        self.core().set_next(next);
        Ok(())
    }

    /// The nodes this node forwards to for traversal purposes: `next` for
    /// ordinary nodes, every branch head for a demuxer.
    fn branches(&self) -> Vec<Arc<dyn Node>> {
        self.core().next().into_iter().collect()
    }

    /// A demuxer's drop counter, surfaced in its stats block. `None` for
    /// ordinary nodes.
    fn drop_count(&self) -> Option<u64> {
        None
    }

    /// Configuration broadcast; default is a no-op, overridden by nodes that
    /// hold mutable configuration (payload-type tables, SRTP keys, ...).
    fn handle_event(&self, _event: &crate::event::Event) {}

    /// Terminates background work (timers, schedulers). Default no-op.
    fn stop(&self) {}
}

/// Pre-order traversal from `root` through `next`/branch edges. Visits each
/// node at most once even if the graph is cyclic.
pub fn visit(root: &Arc<dyn Node>, visitor: &mut dyn FnMut(&Arc<dyn Node>)) {
    let mut seen = HashSet::new();
    visit_inner(root, visitor, &mut seen);
}

fn visit_inner(node: &Arc<dyn Node>, visitor: &mut dyn FnMut(&Arc<dyn Node>), seen: &mut HashSet<usize>) {
    if !seen.insert(node_identity(node)) {
        return;
    }
    visitor(node);
    for branch in node.branches() {
        visit_inner(&branch, visitor, seen);
    }
}

/// Post-order traversal over `inputs` (back-edges), then self. Used for
/// outgoing trees that fan in from multiple sources.
pub fn reverse_visit(root: &Arc<dyn Node>, visitor: &mut dyn FnMut(&Arc<dyn Node>)) {
    let mut seen = HashSet::new();
    reverse_visit_inner(root, visitor, &mut seen);
}

fn reverse_visit_inner(node: &Arc<dyn Node>, visitor: &mut dyn FnMut(&Arc<dyn Node>), seen: &mut HashSet<usize>) {
    if !seen.insert(node_identity(node)) {
        return;
    }
    for input in node.core().inputs() {
        reverse_visit_inner(&input, visitor, seen);
    }
    visitor(node);
}

fn node_identity(node: &Arc<dyn Node>) -> usize {
    Arc::as_ptr(node).cast::<()>() as usize
}

/// Wraps `node` in an `Arc` and wires its self-handle, as every pipeline
/// construction path (builder, tests) must do before calling `attach`.
#[must_use]
pub fn into_linked_arc<N: Node + 'static>(node: N) -> Arc<dyn Node> {
    let arc: Arc<dyn Node> = Arc::new(node);
    arc.core().set_self_handle(Arc::downgrade(&arc));
    arc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct PassThrough {
        core: NodeCore,
    }
    impl PassThrough {
        fn new(name: &str) -> Self {
            Self { core: NodeCore::new(name) }
        }
    }
    impl Node for PassThrough {
        fn core(&self) -> &NodeCore {
            &self.core
        }
        fn do_process(&self, batch: Vec<PacketInfo>) -> Vec<PacketInfo> {
            batch
        }
    }

    fn raw_packet(bytes: &'static [u8]) -> PacketInfo {
        PacketInfo::new(crate::packet_info::PacketKind::Raw(bytes::Bytes::from_static(bytes)), Instant::now())
    }

    #[test]
    fn process_packets_updates_stats_and_forwards() {
        let a = into_linked_arc(PassThrough::new("a"));
        let b = into_linked_arc(PassThrough::new("b"));
        a.attach(b.clone()).unwrap();

        a.process_packets(vec![raw_packet(b"hello")]);

        let a_stats = a.core().snapshot();
        assert_eq!(a_stats.num_input_packets, 1);
        assert_eq!(a_stats.num_output_packets, 1);
        assert_eq!(a_stats.num_bytes, 5);

        let b_stats = b.core().snapshot();
        assert_eq!(b_stats.num_input_packets, 1);
    }

    #[test]
    fn visit_is_preorder_and_cycle_safe() {
        let a = into_linked_arc(PassThrough::new("a"));
        let b = into_linked_arc(PassThrough::new("b"));
        a.attach(b.clone()).unwrap();
        // Force a cycle: b -> a. attach() would also rebind a's `next`, so
        // set it directly to exercise the visited-set instead.
        b.core().set_next(a.clone());

        let visited = Arc::new(AtomicUsize::new(0));
        let order = std::sync::Mutex::new(Vec::new());
        visit(&a, &mut |n| {
            visited.fetch_add(1, Ordering::Relaxed);
            order.lock().unwrap().push(n.name().to_string());
        });

        assert_eq!(visited.load(Ordering::Relaxed), 2);
        assert_eq!(*order.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn reverse_visit_reaches_self_after_inputs() {
        let a = into_linked_arc(PassThrough::new("a"));
        let b = into_linked_arc(PassThrough::new("b"));
        a.attach(b.clone()).unwrap();

        let mut order = Vec::new();
        reverse_visit(&b, &mut |n| order.push(n.name().to_string()));
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }
}
