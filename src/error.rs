//! Error types for file-proxy
//!
//! Each variant maps to one failure class of the control protocol and
//! decides how far the failure is allowed to travel.

use thiserror::Error;

/// Primary error type for library operations
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed or truncated frame; the connection is closed
    #[error("Framing error: {reason}")]
    Framing { reason: String },

    /// Well-framed but semantically invalid body
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Dial, write or read failure on a control connection
    #[error("Transport error with {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    /// No worker registered under this host
    #[error("Unknown worker host: {host}")]
    UnknownHost { host: String },

    /// Bad configuration or reload source content
    #[error("Config error: {reason}")]
    Config { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn framing(reason: impl Into<String>) -> Self {
        Self::Framing { reason: reason.into() }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol { reason: reason.into() }
    }

    pub fn transport(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }
}

/// Result type alias for file-proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
