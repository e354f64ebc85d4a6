// src/utils/error.rs
use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for the mining application.
///
/// The variants fall into three groups with different blast radii:
/// configuration and resource errors abort or roll back a reconfiguration,
/// network and protocol errors stay inside the pool connection state
/// machine and only ever pause mining, and share rejections are counted
/// but never retried.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Invalid or contradictory thread/memory configuration.
    ///
    /// Fatal when hit while loading the config file; at runtime the
    /// controller falls back to auto-derived threads instead.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Huge-page or memory-pool slot allocation failed.
    ///
    /// Aborts the whole worker-pool startup; the caller may retry with a
    /// smaller configuration.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Errors related to network connectivity
    #[error("Network connection error: {0}")]
    ConnectionError(String),

    /// Malformed or rejected pool protocol messages
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// The pool declined a submitted share
    #[error("Share rejected by pool: {0}")]
    ShareRejected(String),

    /// Errors related to mining algorithms (e.g., unsupported variant)
    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// WebSocket communication errors
    #[error("WebSocket error: {0}")]
    WsError(#[from] tungstenite::Error),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

impl MinerError {
    /// True for errors the pool connection manager absorbs by entering
    /// backoff instead of propagating to the controller.
    pub fn is_recoverable_network(&self) -> bool {
        matches!(
            self,
            MinerError::ConnectionError(_)
                | MinerError::ProtocolError(_)
                | MinerError::WsError(_)
                | MinerError::IoError(_)
        )
    }
}

/// Share and job hand-off happens over crossbeam channels; a send failure
/// means the receiving half is gone, surfaced as a channel error.
impl<T> From<crossbeam_channel::SendError<T>> for MinerError {
    fn from(e: crossbeam_channel::SendError<T>) -> Self {
        MinerError::ChannelError(format!("Channel send failed: {}", e))
    }
}

impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_recoverable() {
        assert!(MinerError::ConnectionError("refused".into()).is_recoverable_network());
        assert!(MinerError::ProtocolError("bad json".into()).is_recoverable_network());
        assert!(!MinerError::ResourceExhausted("no slots".into()).is_recoverable_network());
        assert!(!MinerError::ConfigError("bad".into()).is_recoverable_network());
    }
}
