//! Cache backend implementations.

use super::key::CacheKey;
use crate::{Error, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            expires_at: now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64)),
        }
    }
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Storage behind a [`CacheManager`](super::CacheManager).
///
/// `get`, `set`, `delete`, `exists` and `clear` are the contract every backend
/// must honor with identical semantics: `set` overwrites and starts a fresh
/// TTL, an expired entry reads as absent, deleting an absent key is not an
/// error. The remaining methods are optional capabilities.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn exists(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
        Err(Error::Unsupported {
            backend: self.name(),
            operation: "delete_prefix",
        })
    }

    /// Drop expired entries eagerly. Backends with native expiry return 0.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    async fn len(&self) -> Result<usize>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// In-process LRU store. One mutex guards the whole map, so every read,
/// write and lazy purge is linearizable.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::backend_unavailable("memory", "entry map poisoned"))
    }

    fn purge_locked(entries: &mut LruCache<String, CacheEntry>, now: Instant) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        expired.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        if let Some(entry) = entries.get(key.as_str()) {
            if entry.is_expired(now) {
                entries.pop(key.as_str());
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }
        Ok(None)
    }
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.len() >= entries.cap().get() && !entries.contains(key.as_str()) {
            Self::purge_locked(&mut entries, Instant::now());
        }
        entries.put(key.as_str().to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }
    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock()?.pop(key.as_str()).is_some())
    }
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let mut entries = self.lock()?;
        match entries.peek(key.as_str()).map(|e| e.is_expired(Instant::now())) {
            Some(false) => Ok(true),
            Some(true) => {
                entries.pop(key.as_str());
                Ok(false)
            }
            None => Ok(false),
        }
    }
    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.lock()?;
        let matching: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &matching {
            entries.pop(k);
        }
        Ok(matching.len())
    }
    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        Ok(Self::purge_locked(&mut entries, Instant::now()))
    }
    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self.lock()?.iter().filter(|(_, e)| !e.is_expired(now)).count())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn exists(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn delete_prefix(&self, _: &str) -> Result<usize> {
        Ok(0)
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
