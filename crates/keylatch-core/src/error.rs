//! Error types for compare primitives and lock operations

use keylatch_store::StoreError;

use crate::script::OpId;

/// Error type for Keylatch operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown atomic operation: {0}")]
    UnknownOperation(OpId),

    #[error("cached script handle expired: {0}")]
    ScriptHandleExpired(String),

    #[error("lock '{key}' is held by another owner")]
    LockHeldByAnother { key: String },

    #[error("store rejected command: {0}")]
    StoreCommand(String),

    #[error("store call timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("keylatch is not initialized")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Config(String),
}

impl LockError {
    pub fn held_by_another(key: impl Into<String>) -> Self {
        LockError::LockHeldByAnother { key: key.into() }
    }

    /// True when the error means the caller does not own the lock.
    pub fn is_held_by_another(&self) -> bool {
        matches!(self, LockError::LockHeldByAnother { .. })
    }
}

impl From<StoreError> for LockError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => LockError::StoreUnavailable(msg),
            StoreError::Timeout => LockError::Timeout,
            StoreError::NoScript(msg) => LockError::ScriptHandleExpired(msg),
            StoreError::Command { .. } | StoreError::Protocol(_) => {
                LockError::StoreCommand(e.to_string())
            }
        }
    }
}

impl From<config::ConfigError> for LockError {
    fn from(e: config::ConfigError) -> Self {
        LockError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
