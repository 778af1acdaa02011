//! `KvStore` over a Redis-compatible server
//!
//! Backed by `redis::aio::ConnectionManager`: one multiplexed connection that
//! reconnects on its own, so concurrent calls are pipelined instead of
//! queued. The manager is created on first use; a failed connect leaves the
//! store unconnected and the next call tries again.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Cmd, ErrorKind, IntoConnectionInfo, RedisError, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::KvStore;
use crate::value::{KeyTtl, StoreValue};

/// `KvStore` backed by a Redis-compatible server.
pub struct RedisStore {
    config: StoreConfig,
    conn: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Create a store client. The connection is opened on first use.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            conn: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn client(&self) -> StoreResult<redis::Client> {
        let mut info = format!("redis://{}", self.config.address)
            .into_connection_info()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info.redis.db = i64::from(self.config.database);
        info.redis.password = self.config.password.clone();
        redis::Client::open(info).map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        let manager = self
            .conn
            .get_or_try_init(|| async {
                debug!(address = %self.config.address, "Connecting to store");
                let client = self.client()?;
                let manager = tokio::time::timeout(
                    self.config.connect_timeout(),
                    client.get_connection_manager(),
                )
                .await
                .map_err(|_| {
                    StoreError::Unavailable(format!(
                        "connect to {} timed out",
                        self.config.address
                    ))
                })?
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                info!(address = %self.config.address, database = self.config.database, "Connected to store");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    /// Send one command and convert its reply.
    pub async fn query(&self, cmd: &Cmd) -> StoreResult<StoreValue> {
        let mut conn = self.connection().await?;
        let reply: Value =
            match tokio::time::timeout(self.config.command_timeout(), cmd.query_async(&mut conn))
                .await
            {
                Ok(reply) => reply.map_err(map_error)?,
                Err(_) => return Err(StoreError::Timeout),
            };
        to_store_value(reply)
    }

    async fn int(&self, cmd: &Cmd) -> StoreResult<i64> {
        let value = self.query(cmd).await?;
        value
            .as_int()
            .ok_or_else(|| StoreError::Protocol(format!("expected integer reply, got {:?}", value)))
    }

    async fn script_call(
        &self,
        command: &str,
        target: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        let mut cmd = redis::cmd(command);
        cmd.arg(target).arg(keys.len()).arg(keys).arg(args);
        self.query(&cmd).await
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn map_error(e: RedisError) -> StoreError {
    if e.kind() == ErrorKind::NoScriptError {
        return StoreError::NoScript(e.detail().unwrap_or("No matching script").to_string());
    }
    if e.is_timeout() {
        return StoreError::Timeout;
    }
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        return StoreError::Unavailable(e.to_string());
    }
    match e.code() {
        Some(code) => StoreError::from_reply(code, e.detail().unwrap_or_default()),
        None => StoreError::Protocol(e.to_string()),
    }
}

pub(crate) fn to_store_value(value: Value) -> StoreResult<StoreValue> {
    Ok(match value {
        Value::Nil => StoreValue::Nil,
        Value::Int(n) => StoreValue::Int(n),
        Value::BulkString(bytes) => StoreValue::Bulk(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(s) => StoreValue::Status(s),
        Value::Okay => StoreValue::Status("OK".to_string()),
        Value::Boolean(b) => StoreValue::Int(i64::from(b)),
        Value::Array(items) | Value::Set(items) => StoreValue::Array(
            items
                .into_iter()
                .map(to_store_value)
                .collect::<StoreResult<Vec<_>>>()?,
        ),
        other => {
            return Err(StoreError::Protocol(format!(
                "unsupported reply: {:?}",
                other
            )));
        }
    })
}

#[async_trait]
impl KvStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        self.query(&redis::cmd("PING")).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.query(redis::cmd("GET").arg(key)).await? {
            StoreValue::Nil => Ok(None),
            StoreValue::Bulk(s) | StoreValue::Status(s) => Ok(Some(s)),
            other => Err(StoreError::Protocol(format!(
                "unexpected GET reply: {:?}",
                other
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        self.query(&cmd).await.map(|_| ())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let reply = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl)),
            )
            .await?;
        Ok(!reply.is_nil())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.int(redis::cmd("DEL").arg(key)).await? > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.int(redis::cmd("EXISTS").arg(key)).await? > 0)
    }

    async fn time_to_live(&self, key: &str) -> StoreResult<KeyTtl> {
        Ok(KeyTtl::from_millis_reply(
            self.int(redis::cmd("PTTL").arg(key)).await?,
        ))
    }

    async fn function_stats(&self) -> StoreResult<()> {
        self.query(redis::cmd("FUNCTION").arg("STATS"))
            .await
            .map(|_| ())
    }

    async fn function_exists(&self, library: &str) -> StoreResult<bool> {
        match self
            .query(
                redis::cmd("FUNCTION")
                    .arg("LIST")
                    .arg("LIBRARYNAME")
                    .arg(library),
            )
            .await?
        {
            StoreValue::Array(libs) => Ok(!libs.is_empty()),
            StoreValue::Nil => Ok(false),
            other => Err(StoreError::Protocol(format!(
                "unexpected FUNCTION LIST reply: {:?}",
                other
            ))),
        }
    }

    async fn function_load_replace(&self, code: &str) -> StoreResult<String> {
        let reply = self
            .query(redis::cmd("FUNCTION").arg("LOAD").arg("REPLACE").arg(code))
            .await?;
        reply.as_str().map(str::to_string).ok_or_else(|| {
            StoreError::Protocol(format!("unexpected FUNCTION LOAD reply: {:?}", reply))
        })
    }

    async fn fcall(
        &self,
        function: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        self.script_call("FCALL", function, keys, args).await
    }

    async fn script_load(&self, source: &str) -> StoreResult<String> {
        let reply = self
            .query(redis::cmd("SCRIPT").arg("LOAD").arg(source))
            .await?;
        reply.as_str().map(str::to_string).ok_or_else(|| {
            StoreError::Protocol(format!("unexpected SCRIPT LOAD reply: {:?}", reply))
        })
    }

    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        self.script_call("EVALSHA", sha, keys, args).await
    }

    async fn eval(
        &self,
        source: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue> {
        self.script_call("EVAL", source, keys, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_noscript_maps_to_noscript() {
        let err = RedisError::from((ErrorKind::NoScriptError, "No matching script"));
        assert!(matches!(map_error(err), StoreError::NoScript(_)));
    }

    #[test]
    fn test_io_error_maps_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(map_error(RedisError::from(io)).is_unavailable());
    }

    #[test]
    fn test_reply_conversion() {
        assert_eq!(to_store_value(Value::Nil).unwrap(), StoreValue::Nil);
        assert_eq!(to_store_value(Value::Int(1)).unwrap(), StoreValue::Int(1));
        assert_eq!(
            to_store_value(Value::Okay).unwrap(),
            StoreValue::Status("OK".to_string())
        );
        assert_eq!(
            to_store_value(Value::Array(vec![
                Value::BulkString(b"lib".to_vec()),
                Value::Nil
            ]))
            .unwrap(),
            StoreValue::Array(vec![StoreValue::Bulk("lib".to_string()), StoreValue::Nil])
        );
        assert!(to_store_value(Value::Double(1.5)).is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let store = RedisStore::new(StoreConfig::new(addr).with_timeouts(500, 500));
        let err = store.ping().await.unwrap_err();
        assert!(err.is_unavailable());
        // nothing is cached after a failed connect
        assert!(store.conn.get().is_none());
    }
}
