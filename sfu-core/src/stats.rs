//! Recursive stats aggregation across a graph (C5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::node::Node;

/// One node's stats, labeled with an identity suffix when its name collides
/// with a sibling's (duplicate node names are legal; labels disambiguate
/// them in the surfaced tree without touching node identity).
#[derive(Debug, Clone)]
pub struct NodeStatsBlock {
    pub label: String,
    pub num_input_packets: u64,
    pub num_output_packets: u64,
    pub num_bytes: u64,
    pub total_processing_duration: Duration,
    pub wall_clock_bytes_per_sec: Option<f64>,
    pub module_time_bytes_per_sec: Option<f64>,
    pub drop_count: Option<u64>,
    pub children: Vec<NodeStatsBlock>,
}

/// Walks the graph rooted at `root`, building a stats tree that mirrors its
/// branch structure (so a demuxer's children are its paths' heads).
#[must_use]
pub fn collect_stats(root: &Arc<dyn Node>) -> NodeStatsBlock {
    let mut name_counts = HashMap::new();
    build(root, &mut name_counts)
}

fn build(node: &Arc<dyn Node>, name_counts: &mut HashMap<String, usize>) -> NodeStatsBlock {
    let name = node.name().to_string();
    let count = name_counts.entry(name.clone()).or_insert(0);
    let label = if *count == 0 { name } else { format!("{name}#{count}") };
    *count += 1;

    let snapshot = node.core().snapshot();
    let children = node.branches().iter().map(|b| build(b, name_counts)).collect();

    NodeStatsBlock {
        label,
        num_input_packets: snapshot.num_input_packets,
        num_output_packets: snapshot.num_output_packets,
        num_bytes: snapshot.num_bytes,
        total_processing_duration: snapshot.total_processing_duration,
        wall_clock_bytes_per_sec: snapshot.wall_clock_bytes_per_sec,
        module_time_bytes_per_sec: snapshot.module_time_bytes_per_sec,
        drop_count: node.drop_count(),
        children,
    }
}
