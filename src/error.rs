//! Custom error types for the crate.
//!
//! `SessionError` consolidates the failures the controller can surface to its
//! callers. Failures inside the asynchronous SDK boundary never cross it as
//! errors; they are logged and reflected in the connection state instead, and
//! rejected commands report `Ok(false)` rather than an error. This enum stays
//! small: it covers the configuration/persistence layer and the case where
//! the controller task itself has gone away.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store error: {0}")]
    Store(#[from] serde_json::Error),

    #[error("rendering service error: {0}")]
    Service(#[from] anyhow::Error),

    #[error("session controller has shut down")]
    ControllerClosed,
}
