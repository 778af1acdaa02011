//! Configuration loading
//!
//! Settings come from an optional YAML file layered under `KEYLATCH_`
//! environment variables, e.g. `KEYLATCH_STORE__COMMAND_TIMEOUT_MS=2000`
//! overrides `store.command_timeout_ms`.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use keylatch_store::StoreConfig;
use keylatch_store::config::DEFAULT_STORE_ADDRESS;

use crate::error::{LockError, Result};
use crate::lock::MIN_DIVISOR;
use crate::negotiate::ModePreference;

pub const DEFAULT_CONFIG_PATH: &str = "conf/keylatch";

pub const STORE_ADDRESS: &str = "store.address";
pub const STORE_PASSWORD: &str = "store.password";
pub const STORE_DATABASE: &str = "store.database";
pub const STORE_CONNECT_TIMEOUT_MS: &str = "store.connect_timeout_ms";
pub const STORE_COMMAND_TIMEOUT_MS: &str = "store.command_timeout_ms";
pub const EXECUTION_MODE: &str = "execution.mode";
pub const LOCK_DEFAULT_TTL_MS: &str = "lock.default_ttl_ms";
pub const LOCK_KEEP_ALIVE_DIVISOR: &str = "lock.keep_alive_divisor";

pub const DEFAULT_LOCK_TTL_MS: u64 = 30_000;
pub const DEFAULT_KEEP_ALIVE_DIVISOR: u32 = 3;

/// Resolved settings for a `Keylatch` instance
#[derive(Clone, Debug)]
pub struct KeylatchConfig {
    pub store: StoreConfig,
    /// Tier negotiation starts from (default: auto)
    pub execution_mode: ModePreference,
    /// Lease used by `acquire_default` (default: 30000ms)
    pub default_ttl_ms: u64,
    /// Keep-alive renews every `ttl / keep_alive_divisor` (default: 3)
    pub keep_alive_divisor: u32,
}

impl Default for KeylatchConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            execution_mode: ModePreference::Auto,
            default_ttl_ms: DEFAULT_LOCK_TTL_MS,
            keep_alive_divisor: DEFAULT_KEEP_ALIVE_DIVISOR,
        }
    }
}

/// Read an integer setting into `T`, rejecting values that do not fit.
fn get_number<T: TryFrom<i64>>(config: &Config, key: &str, default: T) -> Result<T> {
    match config.get_int(key) {
        Ok(value) => T::try_from(value)
            .map_err(|_| LockError::Config(format!("{} is out of range: {}", key, value))),
        Err(ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e.into()),
    }
}

fn environment() -> Environment {
    Environment::with_prefix("KEYLATCH")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl KeylatchConfig {
    /// Load from `path` (default `conf/keylatch.yml`, optional) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(false))
            .add_source(environment())
            .build()?;
        Self::from_config(&config)
    }

    /// Resolve settings from an already built `Config`, applying defaults.
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = StoreConfig::default();

        let store = StoreConfig {
            address: config
                .get_string(STORE_ADDRESS)
                .unwrap_or(DEFAULT_STORE_ADDRESS.to_string()),
            password: config
                .get_string(STORE_PASSWORD)
                .ok()
                .filter(|p| !p.is_empty()),
            database: get_number(config, STORE_DATABASE, defaults.database)?,
            connect_timeout_ms: get_number(
                config,
                STORE_CONNECT_TIMEOUT_MS,
                defaults.connect_timeout_ms,
            )?,
            command_timeout_ms: get_number(
                config,
                STORE_COMMAND_TIMEOUT_MS,
                defaults.command_timeout_ms,
            )?,
        };

        let execution_mode = match config.get_string(EXECUTION_MODE) {
            Ok(mode) => mode.parse::<ModePreference>().map_err(LockError::Config)?,
            Err(_) => ModePreference::Auto,
        };

        let keep_alive_divisor =
            get_number(config, LOCK_KEEP_ALIVE_DIVISOR, DEFAULT_KEEP_ALIVE_DIVISOR)?;
        if keep_alive_divisor < MIN_DIVISOR {
            return Err(LockError::Config(format!(
                "{} must be at least {}, got {}",
                LOCK_KEEP_ALIVE_DIVISOR, MIN_DIVISOR, keep_alive_divisor
            )));
        }

        Ok(Self {
            store,
            execution_mode,
            default_ttl_ms: get_number(config, LOCK_DEFAULT_TTL_MS, DEFAULT_LOCK_TTL_MS)?,
            keep_alive_divisor,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Per-call bound on store round trips.
    pub fn call_timeout(&self) -> Duration {
        self.store.command_timeout()
    }
}
