//! Script registry: operation identifiers and their script definitions

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{LockError, Result};

/// Atomic operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpId {
    CompareAndSwap,
    CompareAndDelete,
    CompareAndExpire,
}

impl OpId {
    pub const ALL: [OpId; 3] = [
        OpId::CompareAndSwap,
        OpId::CompareAndDelete,
        OpId::CompareAndExpire,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpId::CompareAndSwap => "CAS",
            OpId::CompareAndDelete => "CAD",
            OpId::CompareAndExpire => "CAE",
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Script definitions for one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMeta {
    /// Stable name: library name and function name when installed
    pub name: String,
    /// Function library source (`#!lua name=...`), keys folded into args
    pub function_def: String,
    /// Plain script source, called with separate keys and args
    pub script_def: String,
}

impl ScriptMeta {
    pub fn new(
        name: impl Into<String>,
        function_def: impl Into<String>,
        script_def: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            function_def: function_def.into(),
            script_def: script_def.into(),
        }
    }
}

/// Immutable-after-build table of operation scripts.
///
/// Entries are iterated in `OpId` order so negotiation installs
/// them deterministically.
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    entries: BTreeMap<OpId, ScriptMeta>,
}

impl ScriptRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in compare primitives.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for op in OpId::ALL {
            registry.register(op, super::definitions::builtin_meta(op));
        }
        registry
    }

    /// Register an operation. Re-registering replaces the previous entry,
    /// which is returned.
    pub fn register(&mut self, op: OpId, meta: ScriptMeta) -> Option<ScriptMeta> {
        self.entries.insert(op, meta)
    }

    pub fn lookup(&self, op: OpId) -> Result<&ScriptMeta> {
        self.entries
            .get(&op)
            .ok_or(LockError::UnknownOperation(op))
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpId, &ScriptMeta)> {
        self.entries.iter().map(|(op, meta)| (*op, meta))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

}
