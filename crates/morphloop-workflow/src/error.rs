use morphloop_bridge::BridgeError;
use morphloop_core::{FileId, FormatError, Stage};
use morphloop_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend busy: a cycle or inference is already running")]
    Busy,

    #[error("cycle failed: {0}")]
    Cycle(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("file {file_id} is not valid target format: {source}")]
    Validation {
        file_id: FileId,
        #[source]
        source: FormatError,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("backend error: {0}")]
    Backend(BridgeError),

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("{confirmed} of {total} queued words confirmed")]
    NotReady { confirmed: usize, total: usize },

    #[error("unknown file: {0}")]
    UnknownFile(FileId),

    #[error("no pending cycle result; retry the cycle")]
    NoPendingResult,
}

impl From<BridgeError> for WorkflowError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Busy => Self::Busy,
            BridgeError::Cycle(message) => Self::Cycle(message),
            BridgeError::Inference(message) => Self::Inference(message),
            other => Self::Backend(other),
        }
    }
}
