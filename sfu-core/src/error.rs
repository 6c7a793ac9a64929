use thiserror::Error;

/// Fatal, construction-time errors in the pipeline graph itself — never
/// raised on the packet-processing hot path.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("attach() called on node '{0}', which is a demuxer and routes per-packet instead of chaining a single successor")]
    TopologyMisuse(String),
}
