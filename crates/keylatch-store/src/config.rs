// Store connection configuration

use std::time::Duration;

pub const DEFAULT_STORE_ADDRESS: &str = "127.0.0.1:6379";

/// Connection settings for a remote store
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// `host:port` of the store (default: 127.0.0.1:6379)
    pub address: String,

    /// Password sent with `AUTH` after connecting, if set
    pub password: Option<String>,

    /// Logical database selected after connecting (default: 0)
    pub database: u32,

    /// TCP connect timeout in milliseconds (default: 3000ms)
    pub connect_timeout_ms: u64,

    /// Per-command round trip timeout in milliseconds (default: 5000ms)
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_STORE_ADDRESS.to_string(),
            password: None,
            database: 0,
            connect_timeout_ms: 3000,
            command_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn with_timeouts(mut self, connect_timeout_ms: u64, command_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = connect_timeout_ms;
        self.command_timeout_ms = command_timeout_ms;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.address, "127.0.0.1:6379");
        assert!(config.password.is_none());
        assert_eq!(config.database, 0);
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new("redis.internal:6380")
            .with_password("secret")
            .with_database(2)
            .with_timeouts(1000, 2000);

        assert_eq!(config.address, "redis.internal:6380");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.database, 2);
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.command_timeout_ms, 2000);
    }
}
