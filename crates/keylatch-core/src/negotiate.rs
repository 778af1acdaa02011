//! Capability negotiation
//!
//! Decides once how atomic scripts are invoked against the store:
//! 1. installed function libraries, when the store supports them
//! 2. cached scripts addressed by SHA1 handle
//! 3. raw inline evaluation on every call
//!
//! Every failure degrades to the next tier. Negotiation never fails; the
//! worst outcome is raw evaluation, which is correct on any backend.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use keylatch_store::{KvStore, StoreError, StoreResult};
use tracing::{debug, error, info, warn};

use crate::script::{OpId, ScriptRegistry};

/// Process-wide execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Negotiation has not run yet
    #[default]
    Uninitialized,
    /// Installed function libraries, called with `FCALL`
    ReusableFunction,
    /// Cached scripts, called with `EVALSHA`
    CachedScript,
    /// Full script text sent with `EVAL` on every call
    RawEvaluation,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Uninitialized => "uninitialized",
            ExecutionMode::ReusableFunction => "function",
            ExecutionMode::CachedScript => "script",
            ExecutionMode::RawEvaluation => "eval",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier negotiation starts from.
///
/// `Auto` probes from the top. The others skip the tiers above them,
/// and still degrade if their own tier cannot be set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModePreference {
    #[default]
    Auto,
    Function,
    Script,
    Eval,
}

impl FromStr for ModePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(ModePreference::Auto),
            "function" => Ok(ModePreference::Function),
            "script" => Ok(ModePreference::Script),
            "eval" => Ok(ModePreference::Eval),
            other => Err(format!("invalid execution mode: {}", other)),
        }
    }
}

/// The selected dispatch strategy, including the script handle table
/// when cached scripts are in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Function,
    CachedScript(HashMap<OpId, String>),
    RawEvaluation,
}

impl Strategy {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Strategy::Function => ExecutionMode::ReusableFunction,
            Strategy::CachedScript(_) => ExecutionMode::CachedScript,
            Strategy::RawEvaluation => ExecutionMode::RawEvaluation,
        }
    }
}

/// Runs the tiered capability probe against a store.
pub struct Negotiator<'a> {
    store: &'a dyn KvStore,
    registry: &'a ScriptRegistry,
    call_timeout: Duration,
}

impl<'a> Negotiator<'a> {
    pub fn new(
        store: &'a dyn KvStore,
        registry: &'a ScriptRegistry,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            call_timeout,
        }
    }

    /// Select a strategy. Never fails.
    pub async fn negotiate(&self, preference: ModePreference) -> Strategy {
        if let Err(e) = self.bounded(self.store.ping()).await {
            error!(error = %e, "Store unavailable during negotiation; using raw evaluation");
            return Strategy::RawEvaluation;
        }

        if matches!(preference, ModePreference::Auto | ModePreference::Function)
            && self.supports_functions().await
            && self.install_functions().await
        {
            info!("Store functions loaded successfully");
            return Strategy::Function;
        }

        if preference != ModePreference::Eval
            && let Some(handles) = self.load_scripts().await
        {
            info!(scripts = handles.len(), "Store scripts loaded successfully");
            return Strategy::CachedScript(handles);
        }

        warn!("Failed to load store functions or scripts; will use EVAL on every call");
        Strategy::RawEvaluation
    }

    async fn supports_functions(&self) -> bool {
        match self.bounded(self.store.function_stats()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Store functions not supported");
                false
            }
        }
    }

    async fn install_functions(&self) -> bool {
        for (op, meta) in self.registry.iter() {
            let exists = match self.bounded(self.store.function_exists(&meta.name)).await {
                Ok(exists) => exists,
                Err(e) => {
                    error!(op = %op, error = %e, "Check function existence failed");
                    return false;
                }
            };
            if exists {
                debug!(op = %op, name = %meta.name, "Function already installed");
                continue;
            }
            if let Err(e) = self
                .bounded(self.store.function_load_replace(&meta.function_def))
                .await
            {
                error!(op = %op, error = %e, "Register function failed");
                return false;
            }
        }
        true
    }

    async fn load_scripts(&self) -> Option<HashMap<OpId, String>> {
        let mut handles = HashMap::with_capacity(self.registry.len());
        for (op, meta) in self.registry.iter() {
            match self.bounded(self.store.script_load(&meta.script_def)).await {
                Ok(sha) => {
                    debug!(op = %op, sha = %sha, "Script loaded");
                    handles.insert(op, sha);
                }
                Err(e) => {
                    error!(op = %op, error = %e, "Script load failed");
                    return None;
                }
            }
        }
        Some(handles)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }
}
