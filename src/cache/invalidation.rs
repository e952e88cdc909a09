//! Invalidation after mutations.
//!
//! Exact invalidation re-derives the read path's key and deletes it. Broad
//! invalidation removes every key under a prefix; when the backend cannot
//! enumerate keys the whole cache namespace is cleared instead.

use super::key::{CallArgs, KeyMaterial};
use super::manager::CacheManager;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationTarget {
    /// One cached call: same operation and identifying arguments as the read.
    Exact { operation: String, args: CallArgs },
    /// Every cached call of an operation, whatever its arguments.
    Operation(String),
    /// Every key starting with this (un-namespaced) prefix.
    Prefix(String),
    All,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationPlan {
    targets: Vec<InvalidationTarget>,
}

impl InvalidationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact<A: KeyMaterial + ?Sized>(mut self, operation: impl Into<String>, args: &A) -> Result<Self> {
        self.targets.push(InvalidationTarget::Exact {
            operation: operation.into(),
            args: args.to_call_args()?,
        });
        Ok(self)
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.targets.push(InvalidationTarget::Operation(operation.into()));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.targets.push(InvalidationTarget::Prefix(prefix.into()));
        self
    }

    pub fn all(mut self) -> Self {
        self.targets.push(InvalidationTarget::All);
        self
    }

    pub fn extend(&mut self, other: InvalidationPlan) {
        self.targets.extend(other.targets);
    }

    pub fn targets(&self) -> &[InvalidationTarget] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOutcome {
    Removed(usize),
    /// Backend cannot enumerate keys; the namespace was cleared instead.
    NamespaceCleared,
    /// Backend unreachable; logged, nothing removed.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub exact_removed: usize,
    pub prefix_removed: usize,
    pub cleared: bool,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Invalidator {
    manager: Arc<CacheManager>,
}

impl Invalidator {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }

    /// Delete the entry a read of `operation(args)` would use.
    ///
    /// Returns whether an entry was removed. Key-derivation errors are returned
    /// since a wrong key would silently leave stale data behind.
    pub async fn invalidate<A: KeyMaterial + ?Sized>(&self, operation: &str, args: &A) -> Result<bool> {
        let key = self.manager.key_for(operation, args)?;
        let removed = self.manager.delete(&key).await;
        debug!(operation, key = %key, removed, "invalidated cached call");
        Ok(removed)
    }

    pub async fn invalidate_operation(&self, operation: &str) -> PrefixOutcome {
        let prefix = self.manager.keys().operation_prefix(operation);
        self.delete_namespaced_prefix(&prefix).await
    }

    /// `prefix` is logical: the manager's namespace is prepended.
    pub async fn invalidate_prefix(&self, prefix: &str) -> PrefixOutcome {
        let prefix = self.manager.keys().namespaced(prefix);
        self.delete_namespaced_prefix(&prefix).await
    }

    pub async fn invalidate_all(&self) -> bool {
        self.manager.clear().await
    }

    pub async fn apply(&self, plan: &InvalidationPlan) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for target in plan.targets() {
            if report.cleared {
                break;
            }
            let outcome = match target {
                InvalidationTarget::Exact { operation, args } => {
                    match self.manager.keys().generate_from_args(operation, args) {
                        Ok(key) => {
                            if self.manager.delete(&key).await {
                                report.exact_removed += 1;
                            }
                        }
                        Err(e) => {
                            warn!(operation = %operation, error = %e, "cannot derive key for invalidation");
                            report.failures += 1;
                        }
                    }
                    continue;
                }
                InvalidationTarget::Operation(op) => self.invalidate_operation(op).await,
                InvalidationTarget::Prefix(p) => self.invalidate_prefix(p).await,
                InvalidationTarget::All => {
                    if self.invalidate_all().await {
                        report.cleared = true;
                    } else {
                        report.failures += 1;
                    }
                    continue;
                }
            };
            match outcome {
                PrefixOutcome::Removed(n) => report.prefix_removed += n,
                PrefixOutcome::NamespaceCleared => report.cleared = true,
                PrefixOutcome::Failed => report.failures += 1,
            }
        }
        report
    }

    async fn delete_namespaced_prefix(&self, prefix: &str) -> PrefixOutcome {
        match self.manager.delete_prefix(prefix).await {
            Ok(n) => {
                debug!(prefix, removed = n, "invalidated cache prefix");
                PrefixOutcome::Removed(n)
            }
            Err(Error::Unsupported { backend, .. }) => {
                warn!(prefix, backend, "backend cannot enumerate keys; clearing cache namespace");
                if self.manager.clear().await {
                    PrefixOutcome::NamespaceCleared
                } else {
                    PrefixOutcome::Failed
                }
            }
            Err(e) => {
                warn!(prefix, error = %e, "prefix invalidation failed");
                PrefixOutcome::Failed
            }
        }
    }
}
