// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin async adapter over the key-value store.
//!
//! One `StoreClient` per role (producer, worker, scheduler). The shared
//! connection multiplexes everything except blocking pops; those
//! monopolise a socket, so each worker takes a dedicated connection
//! from [`StoreClient::blocking_connection`].

use crate::error::StoreError;
use crate::version::ServerVersion;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::collections::HashMap;

/// Name reported to the server for connection introspection.
const CLIENT_NAME: &str = "conveyor";

/// Store connection with reconnect backoff and version detection.
#[derive(Clone)]
pub struct StoreClient {
    client: redis::Client,
    conn: ConnectionManager,
    version: ServerVersion,
}

impl StoreClient {
    /// Connect and probe the server.
    ///
    /// Reconnects after drops with exponential backoff. Servers that
    /// reject `CLIENT` commands (ancient or heavily restricted) are
    /// refused up front rather than failing mid-transition.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn =
            ConnectionManager::new_with_config(client.clone(), Self::manager_config()).await?;

        let named: Result<redis::Value, redis::RedisError> = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(CLIENT_NAME)
            .query_async(&mut conn)
            .await;
        if let Err(err) = named {
            let detail = err.to_string();
            if detail.contains("unknown command") {
                return Err(StoreError::UnsupportedServer(format!(
                    "server rejects CLIENT commands: {}",
                    detail
                )));
            }
            return Err(StoreError::Connection(err));
        }

        let info: String = redis::cmd("INFO").arg("server").query_async(&mut conn).await?;
        let version = ServerVersion::parse_info(&info).ok_or_else(|| {
            StoreError::UnsupportedServer("no redis_version in INFO reply".to_string())
        })?;

        tracing::debug!(%version, "store connected");
        Ok(Self { client, conn, version })
    }

    fn manager_config() -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_number_of_retries(6)
            .set_factor(100)
            .set_exponent_base(2)
    }

    /// Clone of the shared multiplexed connection.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Dedicated connection for blocking pops.
    pub async fn blocking_connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn =
            ConnectionManager::new_with_config(self.client.clone(), Self::manager_config())
                .await?;
        Ok(conn)
    }

    pub fn version(&self) -> ServerVersion {
        self.version
    }

    /// Blocking tail-pop from `src` pushed onto the head of `dst`.
    /// Returns `None` on timeout.
    pub async fn brpoplpush(
        conn: &mut ConnectionManager,
        src: &str,
        dst: &str,
        timeout_secs: f64,
    ) -> Result<Option<String>, StoreError> {
        let moved: Option<String> = conn.brpoplpush(src, dst, timeout_secs).await?;
        Ok(moved)
    }

    /// Blocking head-pop, used by the delay pump's marker wake-up.
    /// Returns the pushed value, or `None` on timeout.
    pub async fn blpop(
        conn: &mut ConnectionManager,
        key: &str,
        timeout_secs: f64,
    ) -> Result<Option<String>, StoreError> {
        let popped: Option<(String, String)> = conn.blpop(key, timeout_secs).await?;
        Ok(popped.map(|(_, value)| value))
    }

    pub async fn hash_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let mut conn = self.connection();
        let map: HashMap<String, Vec<u8>> = conn.hgetall(key).await?;
        Ok(map)
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let exists: bool = conn.hexists(key, field).await?;
        Ok(exists)
    }

    pub async fn list_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection();
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    pub async fn zset_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection();
        let len: u64 = conn.zcard(key).await?;
        Ok(len)
    }

    pub async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection();
        let len: u64 = conn.scard(key).await?;
        Ok(len)
    }

    pub async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let items: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(items)
    }

    pub async fn zset_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        ascending: bool,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let items: Vec<String> = if ascending {
            conn.zrange(key, start, stop).await?
        } else {
            redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .query_async(&mut conn)
                .await?
        };
        Ok(items)
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    pub async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn zset_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let removed: u64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    pub async fn zset_entries(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.connection();
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(entries)
    }

    pub async fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// Approximate-trim the events stream to `max_len` entries.
    pub async fn trim_stream(&self, key: &str, max_len: u64) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: () = redis::cmd("XTRIM")
            .arg(key)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Run a command pipeline in one round-trip.
    pub async fn query_pipeline<T: redis::FromRedisValue>(
        &self,
        pipe: &redis::Pipeline,
    ) -> Result<T, StoreError> {
        let mut conn = self.connection();
        let result: T = pipe.query_async(&mut conn).await?;
        Ok(result)
    }

    pub async fn delete_keys(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    /// Collect every key under a prefix pattern via cursor scans.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let mut keys = Vec::new();
        let mut iter = conn.scan_match::<&str, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("version", &self.version)
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}
