//! Cache manager.
//!
//! Every backend call goes through [`CacheManager::guarded`], which bounds it
//! with a timeout. Read failures become misses and write failures become
//! no-ops; both are logged and counted but never returned.

use super::backend::{CacheBackend, MemoryCache, NullCache};
use super::config::{BackendKind, CacheSettings};
use super::key::{CacheKey, CacheKeyGenerator, KeyMaterial};
use super::redis_store::RedisCache;
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub enabled: bool,
    pub max_entry_size: usize,
    pub namespace: Option<String>,
    pub op_timeout: Duration,
    pub bulk_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            enabled: true,
            max_entry_size: 10 * 1024 * 1024,
            namespace: None,
            op_timeout: Duration::from_millis(500),
            bulk_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_ttl(mut self, ttl: Duration) -> Self { self.default_ttl = ttl; self }
    pub fn with_enabled(mut self, enabled: bool) -> Self { self.enabled = enabled; self }
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = Some(ns.into()); self }
    pub fn with_op_timeout(mut self, t: Duration) -> Self { self.op_timeout = t; self }
    pub fn with_bulk_timeout(mut self, t: Duration) -> Self { self.bulk_timeout = t; self }
    pub fn with_max_entry_size(mut self, bytes: usize) -> Self { self.max_entry_size = bytes; self }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(s: &CacheSettings) -> Self {
        Self {
            default_ttl: s.default_ttl(),
            enabled: s.enabled,
            namespace: s.namespace.clone(),
            op_timeout: s.op_timeout(),
            bulk_timeout: s.bulk_timeout(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats { pub hits: u64, pub misses: u64, pub sets: u64, pub deletes: u64, pub errors: u64, pub bypassed: u64 }

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 { let total = self.hits + self.misses; if total == 0 { 0.0 } else { self.hits as f64 / total as f64 } }
}

#[derive(Default)]
struct AtomicStats { hits: AtomicU64, misses: AtomicU64, sets: AtomicU64, deletes: AtomicU64, errors: AtomicU64, bypassed: AtomicU64 }
impl AtomicStats {
    fn to_stats(&self) -> CacheStats { CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed), sets: self.sets.load(Ordering::Relaxed), deletes: self.deletes.load(Ordering::Relaxed), errors: self.errors.load(Ordering::Relaxed), bypassed: self.bypassed.load(Ordering::Relaxed) } }
}

pub struct CacheManager {
    config: CacheConfig,
    keys: CacheKeyGenerator,
    backend: Box<dyn CacheBackend>,
    enabled: AtomicBool,
    stats: AtomicStats,
}

impl CacheManager {
    pub fn new(config: CacheConfig, backend: Box<dyn CacheBackend>) -> Self {
        let keys = match config.namespace {
            Some(ref ns) => CacheKeyGenerator::new().with_namespace(ns.clone()),
            None => CacheKeyGenerator::new(),
        };
        Self { enabled: AtomicBool::new(config.enabled), config, keys, backend, stats: AtomicStats::default() }
    }

    /// In-process manager with default settings; convenient for tests and tools.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(CacheConfig::default(), Box::new(MemoryCache::new(max_entries)))
    }

    /// Build the backend named by `settings`.
    ///
    /// An unreachable Redis server is not fatal: the manager falls back to the
    /// in-process backend and logs a warning. Malformed settings are returned
    /// as `Configuration` errors.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        Self::build(settings, true).await
    }

    /// Like [`from_settings`](Self::from_settings) but an unreachable Redis
    /// server is returned as an error. For tools that must act on the shared
    /// store itself.
    pub async fn from_settings_strict(settings: &CacheSettings) -> Result<Self> {
        Self::build(settings, false).await
    }

    /// [`from_settings`](Self::from_settings), shared, with the expiry sweeper
    /// running when `settings` names a sweep interval.
    pub async fn from_settings_shared(settings: &CacheSettings) -> Result<Arc<Self>> {
        let manager = Arc::new(Self::from_settings(settings).await?);
        if let Some(every) = settings.sweep_interval() {
            debug!(interval_secs = every.as_secs(), "starting cache sweeper");
            manager.spawn_sweeper(every);
        }
        Ok(manager)
    }

    async fn build(settings: &CacheSettings, fallback: bool) -> Result<Self> {
        let config = CacheConfig::from(settings);
        let backend: Box<dyn CacheBackend> = match settings.backend {
            BackendKind::Memory => Box::new(MemoryCache::new(settings.max_entries)),
            BackendKind::None => Box::new(NullCache::new()),
            BackendKind::Redis => {
                let url = settings.redis.connection_url()?;
                match RedisCache::connect(&url, settings.redis.connect_timeout(), settings.namespace.clone()).await {
                    Ok(redis) => Box::new(redis),
                    Err(e @ Error::Configuration { .. }) => return Err(e),
                    Err(e) if !fallback => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "redis cache unavailable at startup; falling back to in-memory cache");
                        Box::new(MemoryCache::new(settings.max_entries))
                    }
                }
            }
        };
        info!(backend = backend.name(), enabled = config.enabled, default_ttl_secs = config.default_ttl.as_secs(), "cache backend ready");
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &CacheConfig { &self.config }
    pub fn keys(&self) -> &CacheKeyGenerator { &self.keys }
    pub fn default_ttl(&self) -> Duration { self.config.default_ttl }
    pub fn stats(&self) -> CacheStats { self.stats.to_stats() }
    pub fn backend_name(&self) -> &'static str { self.backend.name() }

    pub fn key_for<A: KeyMaterial + ?Sized>(&self, operation: &str, args: &A) -> Result<CacheKey> {
        self.keys.generate(operation, args)
    }

    pub fn enable(&self) { self.enabled.store(true, Ordering::SeqCst); }
    pub fn disable(&self) { self.enabled.store(false, Ordering::SeqCst); }
    pub fn is_enabled(&self) -> bool { self.enabled.load(Ordering::SeqCst) }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.is_enabled() {
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match self.guarded("get", self.config.op_timeout, self.backend.get(key)).await {
            Ok(Some(data)) => match serde_json::from_slice(&data) {
                Ok(val) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, "cache hit");
                    Some(val)
                }
                Err(e) => {
                    self.record_failure("get", key.as_str(), &Error::from(e));
                    if let Err(e) = self.guarded("delete", self.config.op_timeout, self.backend.delete(key)).await {
                        self.record_failure("delete", key.as_str(), &e);
                    }
                    None
                }
            },
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "cache miss");
                None
            }
            Err(e) => {
                self.record_failure("get", key.as_str(), &e);
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> bool { self.set_with_ttl(key, value, self.config.default_ttl).await }

    /// Store `value` for `ttl`. Returns whether the value was stored.
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, ttl: Duration) -> bool {
        if !self.is_enabled() {
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let data = match serde_json::to_vec(value) {
            Ok(d) => d,
            Err(e) => {
                self.record_failure("set", key.as_str(), &Error::from(e));
                return false;
            }
        };
        if data.len() > self.config.max_entry_size {
            debug!(key = %key, size = data.len(), "value exceeds max entry size; not cached");
            return false;
        }
        match self.guarded("set", self.config.op_timeout, self.backend.set(key, &data, ttl)).await {
            Ok(()) => { self.stats.sets.fetch_add(1, Ordering::Relaxed); true }
            Err(e) => { self.record_failure("set", key.as_str(), &e); false }
        }
    }

    /// Remove `key`. Not gated by the enable switch, so entries invalidated
    /// while caching is off cannot resurface after it is turned back on.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        match self.guarded("delete", self.config.op_timeout, self.backend.delete(key)).await {
            Ok(d) => { if d { self.stats.deletes.fetch_add(1, Ordering::Relaxed); } d }
            Err(e) => { self.record_failure("delete", key.as_str(), &e); false }
        }
    }

    pub async fn exists(&self, key: &CacheKey) -> bool {
        if !self.is_enabled() {
            self.stats.bypassed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.guarded("exists", self.config.op_timeout, self.backend.exists(key)).await {
            Ok(found) => found,
            Err(e) => { self.record_failure("exists", key.as_str(), &e); false }
        }
    }

    /// Remove every entry. Returns false if the backend could not be reached.
    pub async fn clear(&self) -> bool {
        match self.guarded("clear", self.config.bulk_timeout, self.backend.clear()).await {
            Ok(()) => true,
            Err(e) => { self.record_failure("clear", "*", &e); false }
        }
    }

    /// Raw prefix deletion; errors (including `Unsupported`) are returned so the
    /// invalidation layer can pick a fallback.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let removed = self.guarded("delete_prefix", self.config.bulk_timeout, self.backend.delete_prefix(prefix)).await?;
        self.stats.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> usize {
        match self.guarded("purge_expired", self.config.bulk_timeout, self.backend.purge_expired()).await {
            Ok(n) => n,
            Err(e) => { self.record_failure("purge_expired", "*", &e); 0 }
        }
    }

    /// Number of live entries, if the backend can tell.
    pub async fn len(&self) -> Option<usize> {
        match self.guarded("len", self.config.bulk_timeout, self.backend.len()).await {
            Ok(n) => Some(n),
            Err(e) => { self.record_failure("len", "*", &e); None }
        }
    }

    /// Health probe; unlike the data operations this reports the failure.
    pub async fn ping(&self) -> Result<()> {
        self.guarded("ping", self.config.op_timeout, self.backend.ping()).await
    }

    /// Periodically purge expired entries until the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                let purged = manager.purge_expired().await;
                if purged > 0 {
                    debug!(purged, backend = manager.backend_name(), "swept expired cache entries");
                }
            }
        })
    }

    async fn guarded<T, F>(&self, operation: &'static str, after: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(after, fut).await {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout { backend: self.backend.name(), operation, after }),
        }
    }

    fn record_failure(&self, operation: &'static str, key: &str, err: &Error) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        warn!(backend = self.backend.name(), operation, key, error = %err, "cache operation failed; continuing without cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;

    /// Backend that fails or stalls on every call.
    struct BrokenBackend {
        stall: bool,
    }

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> { self.fail().await }
        async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> { self.fail().await }
        async fn delete(&self, _: &CacheKey) -> Result<bool> { self.fail().await }
        async fn exists(&self, _: &CacheKey) -> Result<bool> { self.fail().await }
        async fn clear(&self) -> Result<()> { self.fail().await }
        async fn len(&self) -> Result<usize> { self.fail().await }
        async fn ping(&self) -> Result<()> { self.fail().await }
        fn name(&self) -> &'static str { "broken" }
    }

    impl BrokenBackend {
        async fn fail<T>(&self) -> Result<T> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Err(Error::backend_unavailable("broken", "connection refused"))
        }
    }

    /// Backend that returns bytes which are not JSON and cannot delete them.
    struct GarbledBackend;

    #[async_trait]
    impl CacheBackend for GarbledBackend {
        async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> { Ok(Some(b"\xff\x00garbage".to_vec())) }
        async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> { Ok(()) }
        async fn delete(&self, _: &CacheKey) -> Result<bool> { Err(Error::backend_unavailable("garbled", "read-only replica")) }
        async fn exists(&self, _: &CacheKey) -> Result<bool> { Ok(true) }
        async fn clear(&self) -> Result<()> { Ok(()) }
        async fn len(&self) -> Result<usize> { Ok(1) }
        fn name(&self) -> &'static str { "garbled" }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person { id: String, name: String }

    fn person() -> Person { Person { id: "42".into(), name: "A".into() } }

    #[tokio::test]
    async fn test_set_then_get_round_trips_typed_value() {
        let cache = CacheManager::in_memory(100);
        let key = cache.key_for("get_person_by_id", &("42",)).unwrap();
        assert!(cache.set(&key, &person()).await);
        assert_eq!(cache.get::<Person>(&key).await, Some(person()));
        assert!(cache.exists(&key).await);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().sets, 1);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = CacheManager::in_memory(100);
        let key = CacheKey::new("k");
        cache.set_with_ttl(&key, &1u32, Duration::from_millis(30)).await;
        assert_eq!(cache.get::<u32>(&key).await, Some(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get::<u32>(&key).await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_bypasses_backend() {
        let cache = CacheManager::in_memory(100);
        let key = CacheKey::new("k");
        cache.set(&key, "v").await;
        cache.disable();
        assert!(!cache.is_enabled());
        assert_eq!(cache.get::<String>(&key).await, None);
        assert!(!cache.exists(&key).await);
        assert!(!cache.set(&CacheKey::new("other"), "x").await);
        assert_eq!(cache.stats().bypassed, 3);

        // Existing entries survive the toggle.
        cache.enable();
        assert_eq!(cache.get::<String>(&key).await.as_deref(), Some("v"));
        assert_eq!(cache.get::<String>(&CacheKey::new("other")).await, None);
    }

    #[tokio::test]
    async fn test_delete_while_disabled_still_invalidates() {
        let cache = CacheManager::in_memory(100);
        let key = CacheKey::new("k");
        cache.set(&key, "v").await;
        cache.disable();
        assert!(cache.delete(&key).await);
        cache.enable();
        assert_eq!(cache.get::<String>(&key).await, None);
    }

    #[tokio::test]
    async fn test_failing_backend_degrades_to_miss() {
        let cache = CacheManager::new(CacheConfig::default(), Box::new(BrokenBackend { stall: false }));
        let key = CacheKey::new("k");
        assert_eq!(cache.get::<String>(&key).await, None);
        assert!(!cache.set(&key, "v").await);
        assert!(!cache.delete(&key).await);
        assert!(!cache.exists(&key).await);
        assert!(!cache.clear().await);
        assert_eq!(cache.len().await, None);
        assert!(cache.ping().await.unwrap_err().is_backend_failure());
        assert_eq!(cache.stats().errors, 6);
    }

    #[tokio::test]
    async fn test_stalled_backend_is_bounded_by_timeout() {
        let config = CacheConfig::default()
            .with_op_timeout(Duration::from_millis(20))
            .with_bulk_timeout(Duration::from_millis(20));
        let cache = CacheManager::new(config, Box::new(BrokenBackend { stall: true }));
        let started = std::time::Instant::now();
        assert_eq!(cache.get::<String>(&CacheKey::new("k")).await, None);
        assert!(!cache.set(&CacheKey::new("k"), "v").await);
        assert!(!cache.clear().await);
        assert!(matches!(cache.ping().await, Err(Error::Timeout { operation: "ping", .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped() {
        let cache = CacheManager::in_memory(100);
        let key = CacheKey::new("k");
        cache.set(&key, "not a number").await;
        assert_eq!(cache.get::<u64>(&key).await, None);
        assert_eq!(cache.get::<String>(&key).await, None);
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_failed_cleanup_of_undecodable_entry_is_counted() {
        let cache = CacheManager::new(CacheConfig::default(), Box::new(GarbledBackend));
        assert_eq!(cache.get::<Person>(&CacheKey::new("k")).await, None);
        // one for the decode, one for the cleanup delete
        assert_eq!(cache.stats().errors, 2);
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_unserializable_value_is_counted_and_skipped() {
        let cache = CacheManager::in_memory(10);
        let key = CacheKey::new("k");
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys have no JSON form");
        assert!(!cache.set(&key, &bad).await);
        assert_eq!(cache.stats().errors, 1);
        assert_eq!(cache.stats().sets, 0);
        assert!(!cache.exists(&key).await);
    }

    #[tokio::test]
    async fn test_oversized_value_is_skipped() {
        let cache = CacheManager::new(
            CacheConfig::default().with_max_entry_size(8),
            Box::new(MemoryCache::new(10)),
        );
        let key = CacheKey::new("big");
        assert!(!cache.set(&key, &"x".repeat(64)).await);
        assert_eq!(cache.get::<String>(&key).await, None);
    }

    #[tokio::test]
    async fn test_namespace_flows_into_keys() {
        let cache = CacheManager::new(CacheConfig::default().with_namespace("pco"), Box::new(MemoryCache::new(10)));
        let key = cache.key_for("get_plans", &("st-1",)).unwrap();
        assert!(key.starts_with("pco:get_plans:"));
    }

    #[tokio::test]
    async fn test_sweeper_purges_and_stops_with_manager() {
        let cache = Arc::new(CacheManager::in_memory(100));
        cache.set_with_ttl(&CacheKey::new("short"), &1, Duration::from_millis(10)).await;
        cache.set_with_ttl(&CacheKey::new("long"), &2, Duration::from_secs(60)).await;
        let handle = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        // already swept, nothing left for a manual purge
        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(cache.len().await, Some(1));
        drop(cache);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_from_settings_falls_back_to_memory() {
        let mut settings = CacheSettings::default();
        settings.backend = BackendKind::Redis;
        settings.redis.url = Some("redis://127.0.0.1:1/0".into());
        settings.redis.connect_timeout_ms = 200;
        let cache = CacheManager::from_settings(&settings).await.unwrap();
        assert_eq!(cache.backend_name(), "memory");

        settings.backend = BackendKind::None;
        let cache = CacheManager::from_settings(&settings).await.unwrap();
        assert_eq!(cache.backend_name(), "null");
    }

    #[tokio::test]
    async fn test_strict_settings_report_unreachable_redis() {
        let mut settings = CacheSettings::default();
        settings.backend = BackendKind::Redis;
        settings.redis.url = Some("redis://127.0.0.1:1/0".into());
        settings.redis.connect_timeout_ms = 200;
        let err = CacheManager::from_settings_strict(&settings).await.err().unwrap();
        assert!(err.is_backend_failure());

        settings.backend = BackendKind::Memory;
        let cache = CacheManager::from_settings_strict(&settings).await.unwrap();
        assert_eq!(cache.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_shared_settings_start_the_sweeper() {
        let settings = CacheSettings { sweep_interval_secs: Some(1), ..CacheSettings::default() };
        let cache = CacheManager::from_settings_shared(&settings).await.unwrap();
        cache.set_with_ttl(&CacheKey::new("short"), &1, Duration::from_millis(10)).await;
        cache.set_with_ttl(&CacheKey::new("long"), &2, Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(cache.len().await, Some(1));
    }

    #[tokio::test]
    async fn test_shared_settings_without_interval_do_not_sweep() {
        let cache = CacheManager::from_settings_shared(&CacheSettings::default()).await.unwrap();
        cache.set_with_ttl(&CacheKey::new("short"), &1, Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_from_settings_rejects_bad_url() {
        let mut settings = CacheSettings::default();
        settings.backend = BackendKind::Redis;
        settings.redis.url = Some("definitely not a url".into());
        assert!(matches!(
            CacheManager::from_settings(&settings).await,
            Err(Error::Configuration { .. })
        ));
    }
}
