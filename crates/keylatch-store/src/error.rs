//! Store error types

/// Error type for key-value store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store command timed out")]
    Timeout,

    #[error("NOSCRIPT {0}")]
    NoScript(String),

    #[error("{kind} {message}")]
    Command { kind: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Build an error from a store error reply (`-KIND message`).
    ///
    /// `NOSCRIPT` replies get their own variant since callers
    /// distinguish an evicted script handle from other rejections.
    pub fn from_reply(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = kind.into();
        let message = message.into();
        if kind == "NOSCRIPT" {
            StoreError::NoScript(message)
        } else {
            StoreError::Command { kind, message }
        }
    }

    /// Generic `ERR` command rejection.
    pub fn command(message: impl Into<String>) -> Self {
        StoreError::Command {
            kind: "ERR".to_string(),
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
