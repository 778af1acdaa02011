//! In-memory scripting store
//!
//! `MemoryStore` implements `KvStore` in process. Function libraries, cached
//! scripts and inline scripts run their Lua source against the key space, so
//! each invocation tier executes exactly the code a remote store would.
//! Scripts run one at a time and exclude plain commands while they run.
//!
//! Capability switches emulate store editions without function libraries
//! or without a script cache. Expiry uses `tokio::time::Instant`, so tests
//! running on a paused clock can advance past a lease.

mod keyspace;
mod lua;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use keylatch_store::{KeyTtl, KvStore, StoreError, StoreResult, StoreValue};
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use tokio::time::Instant;

use keyspace::{Keyspace, SetCondition};

#[derive(Default)]
struct Counters {
    function_loads: AtomicU64,
    script_loads: AtomicU64,
    fcalls: AtomicU64,
    eval_shas: AtomicU64,
    evals: AtomicU64,
}

/// Snapshot of script-related calls served by a `MemoryStore`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub function_loads: u64,
    pub script_loads: u64,
    pub fcalls: u64,
    pub eval_shas: u64,
    pub evals: u64,
}

/// Builder for `MemoryStore`
pub struct MemoryStoreBuilder {
    functions: bool,
    script_cache: bool,
}

impl MemoryStoreBuilder {
    /// Enable or disable function library support (default: enabled)
    pub fn functions(mut self, enabled: bool) -> Self {
        self.functions = enabled;
        self
    }

    /// Enable or disable the script cache (default: enabled)
    pub fn script_cache(mut self, enabled: bool) -> Self {
        self.script_cache = enabled;
        self
    }

    pub fn build(self) -> MemoryStore {
        MemoryStore {
            keyspace: Arc::new(Keyspace::default()),
            commands: RwLock::new(()),
            libraries: DashMap::new(),
            functions: DashMap::new(),
            scripts: DashMap::new(),
            supports_functions: self.functions,
            supports_script_cache: self.script_cache,
            available: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }
}

struct Library {
    code: String,
    functions: Vec<String>,
}

/// In-process `KvStore` that runs scripts with an embedded Lua interpreter
pub struct MemoryStore {
    keyspace: Arc<Keyspace>,
    /// Held exclusively by scripts, shared by plain commands
    commands: RwLock<()>,
    /// Installed library name -> library
    libraries: DashMap<String, Library>,
    /// Installed function name -> library name
    functions: DashMap<String, String>,
    /// Script cache: SHA1 handle -> source
    scripts: DashMap<String, String>,
    supports_functions: bool,
    supports_script_cache: bool,
    available: AtomicBool,
    counters: Counters,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store with every capability enabled.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            functions: true,
            script_cache: true,
        }
    }

    /// SHA1 handle the store assigns to a script source.
    pub fn script_sha(source: &str) -> String {
        const_hex::encode(Sha1::digest(source.as_bytes()))
    }

    /// Take the store offline (every call fails with `Unavailable`) or back online.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every cached script, like `SCRIPT FLUSH`.
    pub fn flush_scripts(&self) {
        self.scripts.clear();
    }

    /// Drop every installed function library, like `FUNCTION FLUSH`.
    pub fn flush_functions(&self) {
        self.libraries.clear();
        self.functions.clear();
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keyspace.live_len(Instant::now())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn stored_len(&self) -> usize {
        self.keyspace.stored_len()
    }

    /// Remove every expired entry now. Writes also do this periodically.
    pub fn purge_expired(&self) -> usize {
        self.shared(|keyspace, now| keyspace.purge_expired(now))
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            function_loads: self.counters.function_loads.load(Ordering::Relaxed),
            script_loads: self.counters.script_loads.load(Ordering::Relaxed),
            fcalls: self.counters.fcalls.load(Ordering::Relaxed),
            eval_shas: self.counters.eval_shas.load(Ordering::Relaxed),
            evals: self.counters.evals.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    /// Run a plain command alongside other plain commands.
    fn shared<T>(&self, f: impl FnOnce(&Keyspace, Instant) -> T) -> T {
        let _shared = self.commands.read();
        f(&self.keyspace, Instant::now())
    }

    /// Run a script with every other command held off.
    fn exclusive<T>(&self, f: impl FnOnce(&Arc<Keyspace>) -> T) -> T {
        let _exclusive = self.commands.write();
        f(&self.keyspace)
    }

    fn unknown_command(name: &str) -> StoreError {
        StoreError::command(format!("unknown command '{}'", name))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        Ok(self.shared(|keyspace, now| keyspace.get(key, now)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_available()?;
        self.shared(|keyspace, now| keyspace.set(key, value, ttl, SetCondition::Always, now));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available()?;
        if ttl < Duration::from_millis(1) {
            return Err(StoreError::command("invalid expire time in 'set' command"));
        }
        Ok(self.shared(|keyspace, now| {
            keyspace.set(key, value, Some(ttl), SetCondition::IfAbsent, now)
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.shared(|keyspace, now| keyspace.delete(key, now)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.shared(|keyspace, now| keyspace.get(key, now).is_some()))
    }

    async fn time_to_live(&self, key: &str) -> StoreResult<KeyTtl> {
        self.check_available()?;
        Ok(self.shared(|keyspace, now| keyspace.ttl(key, now)))
    }

    async fn function_stats(&self) -> StoreResult<()> {
        self.check_available()?;
        if self.supports_functions {
            Ok(())
        } else {
            Err(Self::unknown_command("FUNCTION"))
        }
    }

    async fn function_exists(&self, library: &str) -> StoreResult<bool> {
        self.function_stats().await?;
        Ok(self.libraries.contains_key(library))
    }

    async fn function_load_replace(&self, code: &str) -> StoreResult<String> {
        self.function_stats().await?;
        let (library, functions) = lua::load_library(code)?;

        for function in &functions {
            let owner = self.functions.get(function).map(|owner| owner.clone());
            if owner.is_some_and(|owner| owner != library) {
                return Err(StoreError::command(format!(
                    "Function {} already exists",
                    function
                )));
            }
        }

        if let Some((_, previous)) = self.libraries.remove(&library) {
            for function in previous.functions {
                self.functions.remove(&function);
            }
        }
        for function in &functions {
            self.functions.insert(function.clone(), library.clone());
        }
        self.libraries.insert(
            library.clone(),
            Library {
                code: code.to_string(),
                functions,
            },
        );
        self.counters.function_loads.fetch_add(1, Ordering::Relaxed);
        Ok(library)
    }

    async fn fcall(
        &self,
        function: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        self.function_stats().await?;
        let code = self
            .functions
            .get(function)
            .map(|library| library.clone())
            .and_then(|library| self.libraries.get(&library).map(|lib| lib.code.clone()))
            .ok_or_else(|| StoreError::command("Function not found"))?;
        self.counters.fcalls.fetch_add(1, Ordering::Relaxed);

        self.exclusive(|keyspace| lua::call_function(keyspace, &code, function, keys, args))
    }

    async fn script_load(&self, source: &str) -> StoreResult<String> {
        self.check_available()?;
        if !self.supports_script_cache {
            return Err(Self::unknown_command("SCRIPT"));
        }
        let sha = Self::script_sha(source);
        self.scripts.insert(sha.clone(), source.to_string());
        self.counters.script_loads.fetch_add(1, Ordering::Relaxed);
        Ok(sha)
    }

    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        self.check_available()?;
        if !self.supports_script_cache {
            return Err(Self::unknown_command("EVALSHA"));
        }
        let source = self
            .scripts
            .get(sha)
            .map(|source| source.clone())
            .ok_or_else(|| StoreError::NoScript("No matching script. Please use EVAL.".to_string()))?;
        self.counters.eval_shas.fetch_add(1, Ordering::Relaxed);

        self.exclusive(|keyspace| lua::eval(keyspace, &source, keys, args))
    }

    async fn eval(
        &self,
        source: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        self.check_available()?;
        self.counters.evals.fetch_add(1, Ordering::Relaxed);
        self.exclusive(|keyspace| lua::eval(keyspace, source, keys, args))
    }
}
