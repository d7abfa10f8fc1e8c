//! Error types
//!
//! Every failure in the crate maps onto one of these variants. The publisher
//! turns them into status strings at its boundary; nothing here is fatal to
//! the process.

use crate::registry::MediaKind;

/// Crate error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The hub answered with a non-success status or an unreadable body
    #[error("hub returned {status}: {message}")]
    Protocol { status: u16, message: String },

    /// Capture access was refused by the platform
    #[error("{0} access denied")]
    PermissionDenied(MediaKind),

    /// Invalid or missing configuration (base URL, stream path, ...)
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The source has no matching physical device
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Persisted state could not be read or written
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Build a protocol error from a status code and message
    pub fn protocol(status: u16, message: impl Into<String>) -> Self {
        Error::Protocol {
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            let status = e.status().map(|s| s.as_u16()).unwrap_or(200);
            Error::protocol(status, format!("invalid response body: {e}"))
        } else {
            Error::Transport(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;
