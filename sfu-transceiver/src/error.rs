use thiserror::Error;

/// Failures that cross the transceiver's own public API boundary. Most of
/// the seven error kinds in the packet-processing core (§7) never reach
/// here — they resolve to a dropped packet and an incremented node
/// counter. Only unrecoverable or control-plane failures surface as this
/// type.
#[derive(Debug, Error)]
pub enum TransceiverError {
    #[error("no SRTP/SRTCP transformer installed for {0} direction; call set_srtp_information first")]
    TransformerNotInstalled(&'static str),
    #[error("outgoing queue is full (capacity {capacity}); packet dropped")]
    QueueOverflow { capacity: usize },
    #[error("failed to extract SRTP keying material from the DTLS context: {0}")]
    KeyingMaterialExtraction(String),
    #[error("pipeline topology error: {0}")]
    Topology(#[from] sfu_core::PipelineError),
    #[error("worker thread did not exit within the shutdown deadline")]
    ShutdownTimedOut,
}
