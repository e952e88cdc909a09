//! # pco-cache
//!
//! TTL memoization for Planning Center Online lookups.
//!
//! ## Overview
//!
//! Read-only directory lookups (people, plans, teams) are slow and rate
//! limited. This crate caches their results under deterministic keys, in
//! process or in a shared Redis store, and invalidates them when a write
//! makes them stale. The cache is never authoritative: when it cannot
//! answer, the underlying lookup runs as if no cache existed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pco_cache::cache::{CacheManager, CacheSettings, Invalidator};
//! use pco_cache::catalog::{people, Mutation};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pco_cache::Result<()> {
//!     let settings = CacheSettings::from_env()?;
//!     let manager = CacheManager::from_settings_shared(&settings).await?;
//!
//!     let by_id = people::GET_PERSON_BY_ID.memoizer(Arc::clone(&manager));
//!     let person: Option<serde_json::Value> = by_id
//!         .get_or_compute(&("42",), || async { None /* call the API here */ })
//!         .await?;
//!     # let _ = person;
//!
//!     let plan = Mutation::PersonUpdated { person_id: "42".into() }.invalidation_plan()?;
//!     Invalidator::new(manager).apply(&plan).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Backends, manager, key derivation, memoization, invalidation |
//! | [`catalog`] | Cached Planning Center operations, TTLs, mutation plans |
//! | [`error`] | Unified error type |

pub mod cache;
pub mod catalog;

// Re-export main types for convenience
pub use cache::{CacheKey, CacheManager, CacheSettings, Invalidator, Memoizer};
pub use catalog::Mutation;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
