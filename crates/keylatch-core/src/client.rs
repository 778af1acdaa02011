//! `Keylatch`: compare primitives and distributed locks over one store

use std::sync::Arc;
use std::time::Duration;

use keylatch_store::{KvStore, RedisStore, StoreValue};

use crate::atomic;
use crate::config::KeylatchConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::lock::{self, KeepAlive, LockGuard};
use crate::negotiate::{ExecutionMode, ModePreference};
use crate::script::{OpId, ScriptMeta, ScriptRegistry};

/// Builder for `Keylatch`
pub struct KeylatchBuilder {
    store: Option<Arc<dyn KvStore>>,
    registry: ScriptRegistry,
    config: KeylatchConfig,
}

impl KeylatchBuilder {
    /// Store to run against. Without one, a `RedisStore` is built from the
    /// configured store settings.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: KeylatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Force the tier negotiation starts from.
    pub fn execution_mode(mut self, preference: ModePreference) -> Self {
        self.config.execution_mode = preference;
        self
    }

    /// Replace or add an operation's scripts. Last registration wins.
    pub fn register(mut self, op: OpId, meta: ScriptMeta) -> Self {
        self.registry.register(op, meta);
        self
    }

    pub fn build(self) -> Keylatch {
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(RedisStore::new(self.config.store.clone())) as Arc<dyn KvStore>,
        };
        let executor = Executor::new(
            store,
            self.registry,
            self.config.execution_mode,
            self.config.call_timeout(),
        );
        Keylatch {
            executor: Arc::new(executor),
            config: self.config,
        }
    }
}

/// Entry point for compare primitives and locks.
///
/// Negotiation runs on the first operation unless `negotiate` was called
/// first. Clones share the negotiated mode.
#[derive(Clone)]
pub struct Keylatch {
    executor: Arc<Executor>,
    config: KeylatchConfig,
}

impl Keylatch {
    pub fn builder() -> KeylatchBuilder {
        KeylatchBuilder {
            store: None,
            registry: ScriptRegistry::builtin(),
            config: KeylatchConfig::default(),
        }
    }

    /// Instance over `store` with default settings.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::builder().store(store).build()
    }

    /// Instance connecting to the store described by `config`.
    pub fn from_config(config: KeylatchConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &KeylatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        self.executor.store()
    }

    /// Run capability negotiation now, if it has not run yet.
    pub async fn negotiate(&self) -> ExecutionMode {
        self.executor.negotiate().await
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.executor.mode()
    }

    /// Run a registered operation and return the raw script reply.
    pub async fn execute(&self, op: OpId, keys: &[String], args: &[String]) -> Result<StoreValue> {
        self.executor.execute(op, keys, args).await
    }

    pub async fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> Result<bool> {
        atomic::compare_and_swap(&self.executor, key, expected, new_value).await
    }

    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        atomic::compare_and_delete(&self.executor, key, expected).await
    }

    pub async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        atomic::compare_and_expire(&self.executor, key, expected, ttl).await
    }

    /// Acquire `key` for `ttl` and return a guard that releases it once.
    pub async fn acquire_auto_lock(&self, key: &str, ttl: Duration) -> Result<LockGuard> {
        let token = lock::lock(&self.executor, key, ttl).await?;
        Ok(LockGuard::new(
            self.executor.clone(),
            key.to_string(),
            token,
            ttl,
        ))
    }

    /// `acquire_auto_lock` with the configured default lease.
    pub async fn acquire_default(&self, key: &str) -> Result<LockGuard> {
        self.acquire_auto_lock(key, self.config.default_ttl()).await
    }

    /// Renew `guard` in the background with the configured divisor.
    pub fn keep_alive(&self, guard: &LockGuard) -> KeepAlive {
        guard.keep_alive(self.config.keep_alive_divisor)
    }

    /// Acquire `key` and return the ownership token.
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<String> {
        lock::lock(&self.executor, key, ttl).await
    }

    pub async fn unlock(&self, key: &str, token: &str) -> Result<()> {
        lock::unlock(&self.executor, key, token).await
    }

    pub async fn renew_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<()> {
        lock::renew_lock(&self.executor, key, token, ttl).await
    }

    pub async fn verify_lock(&self, key: &str, token: &str) -> Result<()> {
        lock::verify_lock(&self.executor, key, token).await
    }
}

impl std::fmt::Debug for Keylatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keylatch")
            .field("mode", &self.execution_mode())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::script::definitions::{CAS_NAME, FUNCTION_CAS};

    #[tokio::test]
    async fn test_lazy_negotiation() {
        let keylatch = Keylatch::new(Arc::new(MemoryStore::new()));
        assert_eq!(keylatch.execution_mode(), ExecutionMode::Uninitialized);

        assert!(keylatch.compare_and_delete("k", "v").await.unwrap());
        assert_eq!(keylatch.execution_mode(), ExecutionMode::ReusableFunction);
    }

    #[tokio::test]
    async fn test_clones_share_mode() {
        let store = Arc::new(MemoryStore::builder().functions(false).build());
        let keylatch = Keylatch::builder().store(store.clone()).build();
        let other = keylatch.clone();

        assert_eq!(keylatch.negotiate().await, ExecutionMode::CachedScript);
        assert_eq!(other.execution_mode(), ExecutionMode::CachedScript);
        assert_eq!(other.negotiate().await, ExecutionMode::CachedScript);
        assert_eq!(store.stats().script_loads, 3);
    }

    #[tokio::test]
    async fn test_registered_override_is_used() {
        let meta = ScriptMeta::new(CAS_NAME, FUNCTION_CAS, "return 0");
        let store = Arc::new(MemoryStore::new());
        let keylatch = Keylatch::builder()
            .store(store.clone())
            .register(OpId::CompareAndSwap, meta)
            .execution_mode(ModePreference::Eval)
            .build();

        store.set("k", "a", None).await.unwrap();
        assert!(!keylatch.compare_and_swap("k", "a", "b").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
        assert_eq!(keylatch.execution_mode(), ExecutionMode::RawEvaluation);
    }

    #[tokio::test]
    async fn test_acquire_default_uses_configured_ttl() {
        let store = Arc::new(MemoryStore::new());
        let config = KeylatchConfig {
            default_ttl_ms: 12_000,
            ..KeylatchConfig::default()
        };
        let keylatch = Keylatch::builder().store(store.clone()).config(config).build();

        let guard = keylatch.acquire_default("L").await.unwrap();
        assert_eq!(guard.ttl(), Duration::from_secs(12));
        let ttl = store.time_to_live("L").await.unwrap().remaining().unwrap();
        assert!(ttl <= Duration::from_secs(12));
        guard.release().await.unwrap();
    }
}
