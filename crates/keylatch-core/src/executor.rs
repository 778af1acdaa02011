//! Atomic operation executor
//!
//! Dispatches registered operations to the store through the strategy
//! chosen by negotiation. The strategy is decided once, on the first call
//! or on an explicit `negotiate()`, and never changes afterwards.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keylatch_store::{KvStore, StoreError, StoreValue};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{LockError, Result};
use crate::metrics;
use crate::negotiate::{ExecutionMode, ModePreference, Negotiator, Strategy};
use crate::script::{OpId, ScriptRegistry};

pub struct Executor {
    store: Arc<dyn KvStore>,
    registry: Arc<ScriptRegistry>,
    preference: ModePreference,
    call_timeout: Duration,
    strategy: OnceCell<Strategy>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: ScriptRegistry,
        preference: ModePreference,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            preference,
            call_timeout,
            strategy: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Current mode, `Uninitialized` until negotiation has completed.
    pub fn mode(&self) -> ExecutionMode {
        self.strategy
            .get()
            .map_or(ExecutionMode::Uninitialized, Strategy::mode)
    }

    /// Run negotiation if it has not run yet and return the selected mode.
    ///
    /// Concurrent callers wait for the single in-flight negotiation.
    pub async fn negotiate(&self) -> ExecutionMode {
        self.strategy().await.mode()
    }

    async fn strategy(&self) -> &Strategy {
        self.strategy
            .get_or_init(|| async {
                let negotiator =
                    Negotiator::new(self.store.as_ref(), &self.registry, self.call_timeout);
                let strategy = negotiator.negotiate(self.preference).await;
                let mode = strategy.mode();
                info!(mode = %mode, preference = ?self.preference, "Execution mode selected");
                metrics::set_execution_mode(mode);
                strategy
            })
            .await
    }

    /// Execute `op` with `keys` and `args` using the negotiated strategy.
    pub async fn execute(&self, op: OpId, keys: &[String], args: &[String]) -> Result<StoreValue> {
        let meta = self.registry.lookup(op)?;
        let strategy = self.strategy().await;

        let reply = match strategy {
            Strategy::Function => {
                // installed functions take no key channel; keys lead the args
                let folded: Vec<String> = keys.iter().chain(args).cloned().collect();
                self.bounded(self.store.fcall(&meta.name, &[], &folded)).await
            }
            Strategy::CachedScript(handles) => match handles.get(&op) {
                Some(sha) => self.bounded(self.store.eval_sha(sha, keys, args)).await,
                None => Err(LockError::UnknownOperation(op)),
            },
            Strategy::RawEvaluation => {
                self.bounded(self.store.eval(&meta.script_def, keys, args))
                    .await
            }
        };

        metrics::record_atomic_op(op, strategy.mode(), reply.is_ok());
        if let Err(e) = &reply {
            debug!(op = %op, mode = %strategy.mode(), error = %e, "Atomic operation failed");
        }
        reply
    }

    /// Execute `op` and report whether the script returned `1`.
    pub async fn execute_bool(&self, op: OpId, keys: &[String], args: &[String]) -> Result<bool> {
        Ok(self.execute(op, keys, args).await?.is_one())
    }

    /// Run a store call under the per-call timeout.
    pub(crate) async fn bounded<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(reply) => reply.map_err(LockError::from),
            Err(_) => Err(LockError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn executor(store: Arc<MemoryStore>, preference: ModePreference) -> Executor {
        Executor::new(store, ScriptRegistry::builtin(), preference, TIMEOUT)
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[tokio::test]
    async fn test_mode_uninitialized_until_first_use() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store.clone(), ModePreference::Auto);
        assert_eq!(exec.mode(), ExecutionMode::Uninitialized);

        store.set("k", "a", None).await.unwrap();
        assert!(
            exec.execute_bool(OpId::CompareAndSwap, &[s("k")], &[s("a"), s("b")])
                .await
                .unwrap()
        );
        assert_eq!(exec.mode(), ExecutionMode::ReusableFunction);
        assert_eq!(store.stats().fcalls, 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_negotiates_once() {
        let store = Arc::new(MemoryStore::new());
        let exec = Arc::new(executor(store.clone(), ModePreference::Auto));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let exec = exec.clone();
                tokio::spawn(async move {
                    exec.execute_bool(OpId::CompareAndDelete, &[format!("k{}", i)], &[s("v")])
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }
        assert_eq!(store.stats().function_loads, 3);
        assert_eq!(exec.mode(), ExecutionMode::ReusableFunction);
    }

    #[tokio::test]
    async fn test_cached_script_handle_expired() {
        let store = Arc::new(MemoryStore::builder().functions(false).build());
        let exec = executor(store.clone(), ModePreference::Auto);
        assert_eq!(exec.negotiate().await, ExecutionMode::CachedScript);

        store.flush_scripts();
        let err = exec
            .execute(OpId::CompareAndDelete, &[s("k")], &[s("v")])
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::ScriptHandleExpired(_)));

        // no silent reload
        assert_eq!(store.stats().script_loads, 3);
        assert_eq!(exec.mode(), ExecutionMode::CachedScript);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = ScriptRegistry::new();
        registry.register(
            OpId::CompareAndSwap,
            ScriptRegistry::builtin()
                .lookup(OpId::CompareAndSwap)
                .unwrap()
                .clone(),
        );
        let exec = Executor::new(store, registry, ModePreference::Eval, TIMEOUT);

        let err = exec
            .execute(OpId::CompareAndExpire, &[s("k")], &[s("v"), s("10")])
            .await
            .unwrap_err();
        assert_eq!(err, LockError::UnknownOperation(OpId::CompareAndExpire));
    }

    #[tokio::test]
    async fn test_store_errors_surface() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store.clone(), ModePreference::Eval);
        exec.negotiate().await;

        store.set_available(false);
        let err = exec
            .execute(OpId::CompareAndSwap, &[s("k")], &[s("a"), s("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::StoreUnavailable(_)));

        store.set_available(true);
        assert!(
            !exec
                .execute_bool(OpId::CompareAndSwap, &[s("k")], &[s("a"), s("b")])
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_flushed_function_is_a_command_error() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store.clone(), ModePreference::Function);
        assert_eq!(exec.negotiate().await, ExecutionMode::ReusableFunction);

        store.flush_functions();
        let err = exec
            .execute(OpId::CompareAndDelete, &[s("k")], &[s("v")])
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::StoreCommand(_)));
        assert_eq!(exec.mode(), ExecutionMode::ReusableFunction);
    }

    #[tokio::test]
    async fn test_offline_at_startup_degrades_to_eval() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let exec = executor(store.clone(), ModePreference::Auto);
        assert_eq!(exec.negotiate().await, ExecutionMode::RawEvaluation);

        store.set_available(true);
        store.set("k", "v", None).await.unwrap();
        assert!(
            exec.execute_bool(OpId::CompareAndDelete, &[s("k")], &[s("v")])
                .await
                .unwrap()
        );
        assert_eq!(store.stats().evals, 1);
    }
}
