//! Keylatch Store - the key-value store boundary
//!
//! This crate provides:
//! - `KvStore`: the async interface the lock core calls through
//! - Store reply values and error types
//! - Connection configuration
//! - `RedisStore`: a client for Redis-compatible servers

pub mod config;
pub mod error;
pub mod remote;
pub mod store;
pub mod value;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use remote::RedisStore;
pub use store::KvStore;
pub use value::{KeyTtl, StoreValue};
