//! Error types for s3migrate
//!
//! Store adapters translate their SDK failures into [`Error`] so the pipeline
//! can decide what is transient, what is per-key and what aborts the run.

use thiserror::Error;

/// Result type alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the migration pipeline and its store adapters
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials rejected or access denied
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Bucket or key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection-level failure or a 5xx from the server
    #[error("Network error: {0}")]
    Network(String),

    /// The store asked us to slow down (429, SlowDown, 503)
    #[error("Throttled: {0}")]
    Throttled(String),

    /// A store call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Any other error reported by the store service
    #[error("Service error: {0}")]
    Service(String),

    /// The destination bucket could not be cleared
    #[error("Failed to clear bucket {bucket}: {reason}")]
    Clear { bucket: String, reason: String },

    /// The run was stopped before the listing was fully processed
    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Throttled(_) | Error::Timeout(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Service(msg) | Error::General(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("internalerror")
                    || msg_lower.contains("internal error")
                    || msg_lower.contains("temporary")
            }
            Error::Config(_)
            | Error::Auth(_)
            | Error::NotFound(_)
            | Error::Clear { .. }
            | Error::Interrupted(_) => false,
        }
    }

    /// Whether this error means the object or bucket is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
