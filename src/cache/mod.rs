//! 查找结果缓存模块：为目录服务查询提供带 TTL 的记忆化缓存。
//!
//! # Lookup Caching Module
//!
//! TTL memoization for read-only Planning Center lookups. Results are stored
//! under deterministic keys derived from the operation name and its
//! identifying arguments, and are removed again when a mutation makes them
//! stale.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheBackend`] | Trait for storage backends (get/set/delete/exists/clear) |
//! | [`MemoryCache`] | In-process LRU store with per-entry expiry |
//! | [`RedisCache`] | Shared store on Redis with native expiry |
//! | [`NullCache`] | Store that never holds anything |
//! | [`CacheManager`] | Backend selection, enable switch, timeouts, statistics |
//! | [`CacheKeyGenerator`] | Deterministic keys from operation + arguments |
//! | [`Memoizer`] / [`CachedFn`] | Read-through wrapper around async lookups |
//! | [`Invalidator`] | Exact and prefix invalidation after writes |
//! | [`CacheSettings`] | Startup configuration from env or YAML |
//!
//! ## Example
//!
//! ```rust
//! use pco_cache::cache::{CacheManager, Memoizer};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> pco_cache::Result<()> {
//! let manager = Arc::new(CacheManager::in_memory(1000));
//! let people = Memoizer::new(Arc::clone(&manager), "get_person_by_id");
//!
//! let person: Option<String> = people
//!     .get_or_compute(&("42",), || async { Some("Jane Doe".to_string()) })
//!     .await?;
//! assert_eq!(person.as_deref(), Some("Jane Doe"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Handling
//!
//! The cache is an optimization. Backend errors and timeouts are logged and
//! counted, reads degrade to misses and writes to no-ops. The wrapped lookup
//! always runs when the cache cannot answer.

mod backend;
mod config;
mod invalidation;
mod key;
mod manager;
mod memoize;
mod redis_store;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use config::{BackendKind, CacheSettings, RedisSettings};
pub use invalidation::{
    InvalidationPlan, InvalidationReport, InvalidationTarget, Invalidator, PrefixOutcome,
};
pub use key::{CacheKey, CacheKeyGenerator, CallArgs, KeyMaterial, Kwargs};
pub use manager::{CacheConfig, CacheManager, CacheStats};
pub use memoize::{CachedFn, Memoizer};
pub use redis_store::{escape_glob, RedisCache};
