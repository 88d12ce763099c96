//! crates/chat_core/src/error.rs
//!
//! The error taxonomy every broker operation reports in.

use crate::ports::PortError;

/// Failure of a broker operation, classified for the RPC boundary.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The addressed entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Malformed or empty input, or an invalid state transition.
    #[error("{0}")]
    Validation(String),

    /// Authenticated, but not allowed to do this.
    #[error("{0}")]
    Forbidden(String),

    /// A uniqueness rule was violated (e.g. a taken username).
    #[error("{0}")]
    Conflict(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Session expired")]
    Expired,

    /// An unrecognised failure from the store.
    #[error("Store error: {0}")]
    Store(PortError),
}

impl ChatError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ChatError::NotFound(what.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        ChatError::Validation(reason.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        ChatError::Forbidden(reason.into())
    }
}

impl From<PortError> for ChatError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => ChatError::NotFound(what),
            PortError::Conflict(what) => ChatError::Conflict(what),
            other => ChatError::Store(other),
        }
    }
}

/// A convenience type alias for `Result<T, ChatError>`.
pub type ChatResult<T> = Result<T, ChatError>;
