//! Error types for the override watcher.

/// Top-level error type for a poll cycle and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Missing or invalid configuration (including absent credentials).
    #[error("config error: {0}")]
    Config(String),

    /// Network failure or a response that is neither 2xx nor 304.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be parsed into an override payload.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Downstream notification delivery failed.
    #[error("notifier error: {0}")]
    Notifier(String),

    /// Persistence store read/write failure.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WatchError>;
