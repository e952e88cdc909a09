//! Memoization of lookup operations.
//!
//! A [`Memoizer`] binds an operation name and a TTL to a shared
//! [`CacheManager`]. Each call derives the key from the identity-relevant
//! arguments, returns a hit without running the computation, and otherwise
//! runs it and stores a `Some` result. `None` is never stored, and neither
//! is an error from a fallible computation.

use super::key::{CacheKey, KeyMaterial};
use super::manager::CacheManager;
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Clone)]
pub struct Memoizer {
    manager: Arc<CacheManager>,
    operation: String,
    ttl: Option<Duration>,
}

impl Memoizer {
    pub fn new(manager: Arc<CacheManager>, operation: impl Into<String>) -> Self {
        Self {
            manager,
            operation: operation.into(),
            ttl: None,
        }
    }

    /// Override the manager's default TTL for this operation.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.unwrap_or_else(|| self.manager.default_ttl())
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn key_for<A: KeyMaterial + ?Sized>(&self, args: &A) -> Result<CacheKey> {
        self.manager.key_for(&self.operation, args)
    }

    pub async fn get_or_compute<A, T, F, Fut>(&self, args: &A, compute: F) -> Result<Option<T>>
    where
        A: KeyMaterial + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let key = self.key_for(args)?;
        self.lookup_or_store(key, move || async move { Ok::<_, Error>(compute().await) })
            .await
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for computations that can
    /// fail. The error is returned to the caller and nothing is cached.
    pub async fn try_get_or_compute<A, T, E, F, Fut>(
        &self,
        args: &A,
        compute: F,
    ) -> std::result::Result<Option<T>, E>
    where
        A: KeyMaterial + ?Sized,
        T: Serialize + DeserializeOwned,
        E: From<Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let key = self.key_for(args).map_err(E::from)?;
        self.lookup_or_store(key, compute).await
    }

    /// Wrap `f` into an equivalent computation with caching spliced in.
    pub fn wrap<F>(self, f: F) -> CachedFn<F> {
        CachedFn { memo: self, f }
    }

    async fn lookup_or_store<T, E, F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        if let Some(hit) = self.manager.get::<T>(&key).await {
            return Ok(Some(hit));
        }
        match compute().await? {
            Some(value) => {
                self.manager.set_with_ttl(&key, &value, self.ttl()).await;
                Ok(Some(value))
            }
            None => {
                trace!(operation = %self.operation, key = %key, "empty result; not cached");
                Ok(None)
            }
        }
    }
}

/// A lookup `f(context, args)` with memoization. The context (an API client,
/// a connection) is handed to `f` untouched and never hashed.
pub struct CachedFn<F> {
    memo: Memoizer,
    f: F,
}

impl<F> CachedFn<F> {
    pub fn memoizer(&self) -> &Memoizer {
        &self.memo
    }

    pub async fn call<C, A, T, Fut>(&self, ctx: C, args: A) -> Result<Option<T>>
    where
        F: Fn(C, A) -> Fut,
        Fut: Future<Output = Option<T>>,
        A: KeyMaterial,
        T: Serialize + DeserializeOwned,
    {
        let key = self.memo.key_for(&args)?;
        self.memo
            .lookup_or_store(key, move || async move { Ok::<_, Error>((self.f)(ctx, args).await) })
            .await
    }

    pub async fn try_call<C, A, T, E, Fut>(&self, ctx: C, args: A) -> std::result::Result<Option<T>, E>
    where
        F: Fn(C, A) -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
        A: KeyMaterial,
        T: Serialize + DeserializeOwned,
        E: From<Error>,
    {
        let key = self.memo.key_for(&args).map_err(E::from)?;
        self.memo.lookup_or_store(key, move || (self.f)(ctx, args)).await
    }

    /// Drop the cached result for `args` so the next call recomputes.
    pub async fn invalidate<A: KeyMaterial + ?Sized>(&self, args: &A) -> Result<bool> {
        let key = self.memo.key_for(args)?;
        Ok(self.memo.manager.delete(&key).await)
    }
}
