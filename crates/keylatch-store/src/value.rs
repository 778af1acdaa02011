//! Store reply values

use std::time::Duration;

/// A reply returned by the store for script and function calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    /// Nil reply (missing key, null bulk or null array)
    Nil,
    /// Integer reply
    Int(i64),
    /// Bulk string reply
    Bulk(String),
    /// Status reply (`+OK`)
    Status(String),
    /// Array reply
    Array(Vec<StoreValue>),
}

impl StoreValue {
    /// Coerce the reply to an integer.
    ///
    /// Integers pass through, numeric bulk and status strings are parsed.
    /// Anything else yields `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StoreValue::Int(n) => Some(*n),
            StoreValue::Bulk(s) | StoreValue::Status(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// True when the reply is the integer `1` (or its string form).
    pub fn is_one(&self) -> bool {
        self.as_int() == Some(1)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::Bulk(s) | StoreValue::Status(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, StoreValue::Nil)
    }
}

/// Remaining lifetime of a key as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (`-2`)
    Missing,
    /// The key exists without an expiry (`-1`)
    Persistent,
    /// The key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Decode a `PTTL` reply.
    pub fn from_millis_reply(millis: i64) -> Self {
        match millis {
            -2 => KeyTtl::Missing,
            n if n < 0 => KeyTtl::Persistent,
            n => KeyTtl::Expires(Duration::from_millis(n as u64)),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }
}
