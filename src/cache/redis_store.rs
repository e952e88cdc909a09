//! Shared-store backend on Redis.
//!
//! Expiry is delegated to Redis (`SET .. PX`), so this backend never tracks
//! TTLs itself. Connection and protocol errors surface as
//! [`Error::BackendUnavailable`]; the manager turns them into misses.

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

const BACKEND: &str = "redis";
const DEFAULT_SCAN_BATCH: usize = 500;

fn unavailable(e: redis::RedisError) -> Error {
    Error::backend_unavailable(BACKEND, e.to_string())
}

/// Escape glob metacharacters so a literal prefix can be used in `SCAN MATCH`.
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `SCAN MATCH` pattern for every key under a literal prefix.
fn prefix_pattern(prefix: &str) -> String {
    format!("{}*", escape_glob(prefix))
}

/// `SCAN MATCH` pattern for a whole namespace.
fn namespace_pattern(namespace: Option<&str>) -> Option<String> {
    namespace.map(|ns| prefix_pattern(&format!("{}:", ns)))
}

pub struct RedisCache {
    conn: ConnectionManager,
    namespace: Option<String>,
    scan_batch: usize,
}

impl RedisCache {
    /// Connect and verify the server answers `PING` within `connect_timeout`.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        namespace: Option<String>,
    ) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::configuration_with_context(
                "invalid redis connection url",
                ErrorContext::new()
                    .with_field_path("REDIS_URL")
                    .with_details(e.to_string())
                    .with_source("redis_store"),
            )
        })?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Timeout {
                backend: BACKEND,
                operation: "connect",
                after: connect_timeout,
            })?
            .map_err(unavailable)?;
        let cache = Self {
            conn,
            namespace,
            scan_batch: DEFAULT_SCAN_BATCH,
        };
        tokio::time::timeout(connect_timeout, cache.ping())
            .await
            .map_err(|_| Error::Timeout {
                backend: BACKEND,
                operation: "ping",
                after: connect_timeout,
            })??;
        Ok(cache)
    }

    pub fn with_scan_batch(mut self, n: usize) -> Self {
        self.scan_batch = n.max(1);
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Walk the keyspace with `SCAN MATCH pattern`, optionally deleting each batch.
    async fn scan(&self, pattern: &str, delete: bool) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut total = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if !keys.is_empty() {
                if delete {
                    let removed: usize = redis::cmd("DEL")
                        .arg(&keys)
                        .query_async(&mut conn)
                        .await
                        .map_err(unavailable)?;
                    total += removed;
                } else {
                    total += keys.len();
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(total)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let ms = ttl.as_millis().min(u64::MAX as u128) as u64;
        if ms == 0 {
            // PX 0 is rejected by Redis; an already-expired entry is simply absent.
            self.delete(key).await?;
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("PX")
            .arg(ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = redis::cmd("EXISTS")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(n > 0)
    }

    async fn clear(&self) -> Result<()> {
        match namespace_pattern(self.namespace()) {
            Some(pattern) => {
                self.scan(&pattern, true).await?;
                Ok(())
            }
            None => {
                let mut conn = self.conn.clone();
                redis::cmd("FLUSHDB")
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(unavailable)
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.scan(&prefix_pattern(prefix), true).await
    }

    async fn len(&self) -> Result<usize> {
        match namespace_pattern(self.namespace()) {
            Some(pattern) => self.scan(&pattern, false).await,
            None => {
                let mut conn = self.conn.clone();
                redis::cmd("DBSIZE")
                    .query_async(&mut conn)
                    .await
                    .map_err(unavailable)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}
