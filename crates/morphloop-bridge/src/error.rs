use thiserror::Error;

/// Errors crossing the backend bridge.
///
/// Cloneable so a single init failure can be handed to every caller that
/// joined the same initialization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("backend busy: another request is in flight")]
    Busy,

    #[error("cycle failed: {0}")]
    Cycle(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("backend init failed: {0}")]
    Init(String),

    #[error("backend persistence failed: {0}")]
    Persistence(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend channel closed")]
    Closed,
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
