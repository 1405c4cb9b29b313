//! Agent-side error type.

use thiserror::Error;

/// Unified error type for agent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing or malformed configuration; fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Transport failure: timeout, refused connection. Retryable by the
    /// next periodic sync.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server rejected the session token.
    #[error("authentication failed")]
    AuthFailed,

    /// Any other non-2xx server response.
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// Local read/write failure.
    #[error("local io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Watcher setup or event-stream failure.
    #[error("watcher error: {0}")]
    Watcher(String),
}

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
