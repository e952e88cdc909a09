//! End-to-end tests for memoized directory lookups
//!
//! A fake Planning Center directory counts its API calls so the tests can
//! tell cache hits from recomputation.

use async_trait::async_trait;
use futures::future::join_all;
use pco_cache::cache::{
    CacheBackend, CacheConfig, CacheKey, CacheManager, Invalidator, Memoizer, NullCache,
};
use pco_cache::catalog::{people, services, Mutation};
use pco_cache::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    id: String,
    first_name: String,
    last_name: String,
}

#[derive(Default)]
struct FakeDirectory {
    people: Mutex<HashMap<String, Person>>,
    emails: Mutex<HashMap<String, Vec<String>>>,
    calls: AtomicUsize,
}

impl FakeDirectory {
    fn with_person(id: &str, first: &str, last: &str) -> Arc<Self> {
        let dir = Self::default();
        dir.people.lock().unwrap().insert(
            id.to_string(),
            Person { id: id.into(), first_name: first.into(), last_name: last.into() },
        );
        Arc::new(dir)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn fetch_person(&self, id: &str) -> Option<Person> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.people.lock().unwrap().get(id).cloned()
    }

    async fn search(&self, first: &str, last: &str) -> Option<Person> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.people
            .lock()
            .unwrap()
            .values()
            .find(|p| p.first_name == first && p.last_name == last)
            .cloned()
    }

    async fn fetch_emails(&self, id: &str) -> Option<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.emails.lock().unwrap().get(id).cloned().unwrap_or_default())
    }

    fn rename(&self, id: &str, first: &str) {
        if let Some(p) = self.people.lock().unwrap().get_mut(id) {
            p.first_name = first.to_string();
        }
    }
}

/// Data-access layer the way a service would wire it.
struct PeopleApi {
    dir: Arc<FakeDirectory>,
    by_id: Memoizer,
    by_name: Memoizer,
    emails: Memoizer,
    invalidator: Invalidator,
}

impl PeopleApi {
    fn new(manager: Arc<CacheManager>, dir: Arc<FakeDirectory>) -> Self {
        Self {
            dir,
            by_id: people::GET_PERSON_BY_ID.memoizer(Arc::clone(&manager)),
            by_name: people::FIND_PERSON_BY_NAME.memoizer(Arc::clone(&manager)),
            emails: people::GET_PERSON_EMAILS.memoizer(Arc::clone(&manager)),
            invalidator: Invalidator::new(manager),
        }
    }

    async fn get_person_by_id(&self, id: &str) -> Result<Option<Person>> {
        self.by_id.get_or_compute(&(id,), || self.dir.fetch_person(id)).await
    }

    async fn find_person_by_name(&self, first: &str, last: &str) -> Result<Option<Person>> {
        self.by_name.get_or_compute(&(first, last), || self.dir.search(first, last)).await
    }

    async fn get_person_emails(&self, id: &str) -> Result<Option<Vec<String>>> {
        self.emails.get_or_compute(&(id,), || self.dir.fetch_emails(id)).await
    }

    async fn rename_person(&self, id: &str, first: &str) -> Result<()> {
        self.dir.rename(id, first);
        let plan = Mutation::PersonUpdated { person_id: id.to_string() }.invalidation_plan()?;
        self.invalidator.apply(&plan).await;
        Ok(())
    }

    async fn add_email(&self, id: &str, email: &str) -> Result<()> {
        self.dir
            .emails
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(email.to_string());
        let plan = Mutation::EmailAdded { person_id: id.to_string() }.invalidation_plan()?;
        self.invalidator.apply(&plan).await;
        Ok(())
    }
}

/// Backend whose every operation fails, like an unreachable shared store.
struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> {
        Err(Error::backend_unavailable("down", "connection refused"))
    }
    async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> {
        Err(Error::backend_unavailable("down", "connection refused"))
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Err(Error::backend_unavailable("down", "connection refused"))
    }
    async fn exists(&self, _: &CacheKey) -> Result<bool> {
        Err(Error::backend_unavailable("down", "connection refused"))
    }
    async fn clear(&self) -> Result<()> {
        Err(Error::backend_unavailable("down", "connection refused"))
    }
    async fn len(&self) -> Result<usize> {
        Err(Error::backend_unavailable("down", "connection refused"))
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

#[tokio::test]
async fn test_lookup_is_served_from_cache_until_mutation() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::in_memory(1000));
    let api = PeopleApi::new(Arc::clone(&manager), Arc::clone(&dir));

    let first = api.get_person_by_id("42").await.unwrap().unwrap();
    assert_eq!(first.first_name, "Jane");
    assert_eq!(dir.calls(), 1);

    let second = api.get_person_by_id("42").await.unwrap().unwrap();
    assert_eq!(second, first);
    assert_eq!(dir.calls(), 1);

    api.rename_person("42", "Janet").await.unwrap();
    let fresh = api.get_person_by_id("42").await.unwrap().unwrap();
    assert_eq!(fresh.first_name, "Janet");
    assert_eq!(dir.calls(), 2);

    let stats = manager.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[tokio::test]
async fn test_rename_invalidates_name_searches() {
    let dir = FakeDirectory::with_person("7", "John", "Smith");
    let api = PeopleApi::new(Arc::new(CacheManager::in_memory(1000)), Arc::clone(&dir));

    assert!(api.find_person_by_name("John", "Smith").await.unwrap().is_some());
    assert!(api.find_person_by_name("John", "Smith").await.unwrap().is_some());
    assert_eq!(dir.calls(), 1);

    api.rename_person("7", "Jon").await.unwrap();
    assert!(api.find_person_by_name("John", "Smith").await.unwrap().is_none());
    assert!(api.find_person_by_name("Jon", "Smith").await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_person_is_not_cached() {
    let dir = FakeDirectory::with_person("1", "A", "B");
    let api = PeopleApi::new(Arc::new(CacheManager::in_memory(1000)), Arc::clone(&dir));

    assert!(api.get_person_by_id("404").await.unwrap().is_none());
    assert!(api.get_person_by_id("404").await.unwrap().is_none());
    assert_eq!(dir.calls(), 2);
}

#[tokio::test]
async fn test_empty_email_list_is_cached_and_invalidated() {
    let dir = FakeDirectory::with_person("9", "C", "D");
    let api = PeopleApi::new(Arc::new(CacheManager::in_memory(1000)), Arc::clone(&dir));

    assert_eq!(api.get_person_emails("9").await.unwrap(), Some(vec![]));
    assert_eq!(api.get_person_emails("9").await.unwrap(), Some(vec![]));
    assert_eq!(dir.calls(), 1);

    api.add_email("9", "c@example.org").await.unwrap();
    assert_eq!(
        api.get_person_emails("9").await.unwrap(),
        Some(vec!["c@example.org".to_string()])
    );
    assert_eq!(dir.calls(), 2);
}

#[tokio::test]
async fn test_unreachable_backend_degrades_to_direct_lookups() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::new(CacheConfig::default(), Box::new(DownBackend)));
    let api = PeopleApi::new(Arc::clone(&manager), Arc::clone(&dir));

    for _ in 0..3 {
        let p = api.get_person_by_id("42").await.unwrap();
        assert_eq!(p.map(|p| p.last_name).as_deref(), Some("Doe"));
    }
    assert_eq!(dir.calls(), 3);

    // Invalidation against a dead backend is logged, not raised.
    api.rename_person("42", "J").await.unwrap();
    assert!(manager.stats().errors >= 6);
}

#[tokio::test]
async fn test_null_backend_always_recomputes() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::new(CacheConfig::default(), Box::new(NullCache::new())));
    let api = PeopleApi::new(manager, Arc::clone(&dir));
    api.get_person_by_id("42").await.unwrap();
    api.get_person_by_id("42").await.unwrap();
    assert_eq!(dir.calls(), 2);
}

#[tokio::test]
async fn test_disabled_cache_is_transparent_and_invalidation_sticks() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::in_memory(1000));
    let api = PeopleApi::new(Arc::clone(&manager), Arc::clone(&dir));

    api.get_person_by_id("42").await.unwrap();
    manager.disable();
    api.get_person_by_id("42").await.unwrap();
    assert_eq!(dir.calls(), 2);

    api.rename_person("42", "Janet").await.unwrap();
    manager.enable();
    let p = api.get_person_by_id("42").await.unwrap().unwrap();
    assert_eq!(p.first_name, "Janet");
}

#[tokio::test]
async fn test_entries_expire() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::in_memory(1000));
    let memo = Memoizer::new(manager, "get_person_by_id").with_ttl(Duration::from_millis(50));

    memo.get_or_compute(&("42",), || dir.fetch_person("42")).await.unwrap();
    memo.get_or_compute(&("42",), || dir.fetch_person("42")).await.unwrap();
    assert_eq!(dir.calls(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    memo.get_or_compute(&("42",), || dir.fetch_person("42")).await.unwrap();
    assert_eq!(dir.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_agree() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::in_memory(1000));
    let memo = Memoizer::new(Arc::clone(&manager), "get_person_by_id");

    let handles = (0..16).map(|_| {
        let memo = memo.clone();
        let dir = Arc::clone(&dir);
        tokio::spawn(async move {
            memo.get_or_compute(&("42",), || dir.fetch_person("42")).await
        })
    });
    for joined in join_all(handles).await {
        let p = joined.unwrap().unwrap().unwrap();
        assert_eq!(p.id, "42");
    }
    let after_burst = dir.calls();
    assert!((1..=16).contains(&after_burst));

    memo.get_or_compute(&("42",), || dir.fetch_person("42")).await.unwrap();
    assert_eq!(dir.calls(), after_burst);
}

#[tokio::test]
async fn test_wrapped_lookup_with_client_context() {
    let dir = FakeDirectory::with_person("42", "Jane", "Doe");
    let manager = Arc::new(CacheManager::in_memory(1000));
    let lookup = people::GET_PERSON_BY_ID
        .memoizer(manager)
        .wrap(|client: Arc<FakeDirectory>, (id,): (String,)| async move {
            client.fetch_person(&id).await
        });

    // Two distinct client handles, same identifying arguments: one entry.
    let other_client = FakeDirectory::with_person("42", "Other", "Client");
    let a: Option<Person> = lookup.call(Arc::clone(&dir), ("42".to_string(),)).await.unwrap();
    let b: Option<Person> = lookup.call(other_client, ("42".to_string(),)).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(dir.calls(), 1);

    assert!(lookup.invalidate(&("42",)).await.unwrap());
}

#[tokio::test]
async fn test_plan_mutations_leave_unrelated_entries() {
    let manager = Arc::new(CacheManager::new(
        CacheConfig::default().with_namespace("pco"),
        Box::new(pco_cache::cache::MemoryCache::new(1000)),
    ));
    let teams = services::GET_TEAMS.memoizer(Arc::clone(&manager));
    let roster = services::GET_PLAN_PEOPLE.memoizer(Arc::clone(&manager));
    let calls = AtomicUsize::new(0);
    let fetch = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Some(vec!["x".to_string()])
    };

    teams.get_or_compute(&("1",), fetch).await.unwrap();
    roster.get_or_compute(&("1", "9"), fetch).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let plan = Mutation::PlanPersonAdded { service_type_id: "1".into(), plan_id: "9".into() }
        .invalidation_plan()
        .unwrap();
    let report = Invalidator::new(Arc::clone(&manager)).apply(&plan).await;
    assert_eq!(report.exact_removed, 1);

    teams.get_or_compute(&("1",), fetch).await.unwrap();
    roster.get_or_compute(&("1", "9"), fetch).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
