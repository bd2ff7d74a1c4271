//! In-memory cache provider
//!
//! Stores keyed JSON values per registered type. Blocking reads park on a
//! per-entry `watch` channel until a newer index (or an error) is written.
//! Polling reads honor the request's max age the way a read-through cache
//! does: data that old is treated as re-read and its age resets.
//! Useful for tests, demos, and single-process caches fed by application
//! code.

use crate::config::MemoryConfig;
use crate::error::{NotifyError, Result};
use crate::provider::CacheProvider;
use crate::types::{Fetched, RequestInfo, ResultMeta, TypeCapability};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock as StdRwLock;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

type EntryKey = (String, String);

struct Entry {
    value: Option<serde_json::Value>,
    index: u64,
    refreshed_at: Instant,
    error: Option<NotifyError>,
    changed: watch::Sender<u64>,
}

impl Entry {
    fn empty() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            value: None,
            index: 0,
            refreshed_at: Instant::now(),
            error: None,
            changed,
        }
    }

    fn ready_for(&self, min_index: u64) -> bool {
        min_index == 0 || self.index > min_index || self.error.is_some()
    }

    /// Parked-on by blocking readers but never written
    fn is_placeholder(&self) -> bool {
        self.value.is_none() && self.error.is_none() && self.index == 0
    }

    fn snapshot(&self) -> Fetched<serde_json::Value> {
        self.snapshot_with_hit(self.value.is_some())
    }

    fn snapshot_with_hit(&self, hit: bool) -> Fetched<serde_json::Value> {
        Fetched {
            value: self.value.clone(),
            meta: ResultMeta {
                index: self.index,
                age: self.refreshed_at.elapsed(),
                hit,
            },
            error: self.error.clone(),
        }
    }

    /// Serve a polling read; data at or past `max_age` counts as re-read
    /// from its source and comes back fresh as a miss
    fn read_through(&mut self, max_age: Option<Duration>) -> Fetched<serde_json::Value> {
        let stale = max_age.is_some_and(|max_age| self.refreshed_at.elapsed() >= max_age);
        if stale && self.value.is_some() && self.error.is_none() {
            self.refreshed_at = Instant::now();
            return self.snapshot_with_hit(false);
        }
        self.snapshot()
    }

    fn store(&mut self, value: serde_json::Value, index: u64) {
        self.value = Some(value);
        self.index = index;
        self.refreshed_at = Instant::now();
        self.error = None;
        self.changed.send_replace(index);
    }
}

/// In-memory cache provider
pub struct MemoryProvider {
    config: MemoryConfig,
    types: StdRwLock<HashMap<String, TypeCapability>>,
    entries: RwLock<HashMap<EntryKey, Entry>>,
    last_index: AtomicU64,
    fetches: AtomicU64,
}

impl MemoryProvider {
    /// Create a provider, registering the types listed in `config`
    pub fn new(config: MemoryConfig) -> Self {
        let types = config.types.clone();
        Self {
            config,
            types: StdRwLock::new(types),
            entries: RwLock::new(HashMap::new()),
            last_index: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Register (or re-register) a cache type
    pub fn register_type(&self, type_id: impl Into<String>, capability: TypeCapability) {
        let type_id = type_id.into();
        let mut types = match self.types.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!(type_id = %type_id, capability = ?capability, "Cache type registered");
        types.insert(type_id, capability);
    }

    /// Store a value under the next global index, returning that index
    pub async fn set(
        &self,
        type_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<u64> {
        self.ensure_type(type_id)?;
        let index = self.last_index.fetch_add(1, Ordering::SeqCst) + 1;

        let mut entries = self.entries.write().await;
        entries
            .entry((type_id.to_string(), key.to_string()))
            .or_insert_with(Entry::empty)
            .store(value, index);

        tracing::trace!(type_id, key, index, "Cache entry set");
        Ok(index)
    }

    /// Store a value at an explicit index
    ///
    /// Reusing the current index models a source that mutates its data in
    /// place without advancing its version.
    pub async fn set_with_index(
        &self,
        type_id: &str,
        key: &str,
        value: serde_json::Value,
        index: u64,
    ) -> Result<()> {
        self.ensure_type(type_id)?;
        self.last_index.fetch_max(index, Ordering::SeqCst);

        let mut entries = self.entries.write().await;
        entries
            .entry((type_id.to_string(), key.to_string()))
            .or_insert_with(Entry::empty)
            .store(value, index);
        Ok(())
    }

    /// Make fetches of an entry fail, keeping its stale value and index
    pub async fn set_error(&self, type_id: &str, key: &str, error: NotifyError) -> Result<()> {
        self.ensure_type(type_id)?;

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry((type_id.to_string(), key.to_string()))
            .or_insert_with(Entry::empty);
        entry.error = Some(error);
        let index = entry.index;
        entry.changed.send_replace(index);
        Ok(())
    }

    /// Clear a previously injected error
    pub async fn clear_error(&self, type_id: &str, key: &str) {
        let mut entries = self.entries.write().await;
        let key = (type_id.to_string(), key.to_string());
        if let Some(entry) = entries.get_mut(&key) {
            entry.error = None;
            if entry.is_placeholder() && entry.changed.receiver_count() == 0 {
                entries.remove(&key);
            }
        }
    }

    /// Remove an entry, waking any blocked readers
    pub async fn remove(&self, type_id: &str, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries
            .remove(&(type_id.to_string(), key.to_string()))
            .is_some_and(|entry| !entry.is_placeholder())
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|entry| !entry.is_placeholder()).count()
    }

    /// Whether the provider holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total number of fetches served
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn ensure_type(&self, type_id: &str) -> Result<()> {
        self.capability(type_id)
            .map(|_| ())
            .ok_or_else(|| NotifyError::UnknownType(type_id.to_string()))
    }

    /// Current state of `key` for a reader that stopped waiting, dropping
    /// the entry if it is an unused placeholder
    async fn settle(&self, key: &EntryKey) -> Fetched<serde_json::Value> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get(key) else {
            return Fetched::missing();
        };
        let fetched = entry.snapshot();
        if entry.is_placeholder() && entry.changed.receiver_count() == 0 {
            entries.remove(key);
        }
        fetched
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    type Value = serde_json::Value;
    type Request = RequestInfo;

    async fn fetch(
        &self,
        type_id: &str,
        request: &RequestInfo,
        min_index: u64,
    ) -> Fetched<serde_json::Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let Some(capability) = self.capability(type_id) else {
            return Fetched::failed(NotifyError::UnknownType(type_id.to_string()));
        };

        let key = (type_id.to_string(), request.key.clone());
        let mut changed = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&key) {
                Some(entry) if capability == TypeCapability::Polling => {
                    return entry.read_through(request.positive_max_age());
                }
                Some(entry) if entry.ready_for(min_index) => return entry.snapshot(),
                Some(entry) => entry.changed.subscribe(),
                None if capability == TypeCapability::Polling || min_index == 0 => {
                    return Fetched::missing();
                }
                // Placeholder to park on; pruned once no reader needs it.
                // Readers dropped mid-wait never settle, so sweep theirs here.
                None => {
                    entries.retain(|_, entry| {
                        !entry.is_placeholder() || entry.changed.receiver_count() > 0
                    });
                    entries
                        .entry(key.clone())
                        .or_insert_with(Entry::empty)
                        .changed
                        .subscribe()
                }
            }
        };

        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.blocking_timeout());
        // Past the end of the clock: wait for a change with no deadline
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let woke = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, changed.changed()).await {
                    Ok(woke) => woke,
                    Err(_) => {
                        tracing::trace!(type_id, key = %request.key, min_index, "Blocking fetch timed out");
                        break;
                    }
                },
                None => changed.changed().await,
            };
            // Err: entry removed while we were waiting
            if woke.is_err() {
                break;
            }
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.ready_for(min_index) => return entry.snapshot(),
                Some(_) => continue,
                None => break,
            }
        }

        drop(changed);
        self.settle(&key).await
    }

    fn capability(&self, type_id: &str) -> Option<TypeCapability> {
        let types = match self.types.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        types.get(type_id).copied()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn provider() -> MemoryProvider {
        MemoryProvider::new(
            MemoryConfig::default()
                .with_type("health", TypeCapability::Blocking)
                .with_type("catalog", TypeCapability::Polling),
        )
    }

    #[tokio::test]
    async fn test_capability_lookup() {
        let p = provider();
        assert_eq!(p.capability("health"), Some(TypeCapability::Blocking));
        assert_eq!(p.capability("catalog"), Some(TypeCapability::Polling));
        assert_eq!(p.capability("nope"), None);

        p.register_type("kv", TypeCapability::Blocking);
        assert_eq!(p.capability("kv"), Some(TypeCapability::Blocking));
        assert_eq!(p.name(), "memory");
    }

    #[tokio::test]
    async fn test_set_assigns_increasing_indexes() {
        let p = provider();
        let a = p.set("health", "web", serde_json::json!(1)).await.unwrap();
        let b = p.set("catalog", "db", serde_json::json!(2)).await.unwrap();
        let c = p.set("health", "web", serde_json::json!(3)).await.unwrap();
        assert!(a < b && b < c);
        assert_eq!(p.len().await, 2);
    }

    #[tokio::test]
    async fn test_set_unknown_type() {
        let p = provider();
        let err = p.set("ghost", "k", serde_json::json!(null)).await.unwrap_err();
        assert_eq!(err, NotifyError::UnknownType("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_unknown_type() {
        let p = provider();
        let fetched = p.fetch("ghost", &RequestInfo::new("k"), 0).await;
        assert!(fetched.value.is_none());
        assert_eq!(fetched.meta.index, 0);
        assert!(matches!(fetched.error, Some(NotifyError::UnknownType(_))));
    }

    #[tokio::test]
    async fn test_fetch_zero_index_returns_immediately() {
        let p = provider();
        let fetched = p.fetch("health", &RequestInfo::new("web"), 0).await;
        assert!(fetched.value.is_none());
        assert!(!fetched.meta.hit);

        let index = p.set("health", "web", serde_json::json!({"ok": true})).await.unwrap();
        let fetched = p.fetch("health", &RequestInfo::new("web"), 0).await;
        assert_eq!(fetched.meta.index, index);
        assert_eq!(fetched.value.unwrap()["ok"], true);
        assert!(fetched.meta.hit);
        assert_eq!(p.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_fetch_wakes_on_set() {
        let p = Arc::new(provider());
        let index = p.set("health", "web", serde_json::json!("a")).await.unwrap();

        let reader = {
            let p = p.clone();
            tokio::spawn(async move { p.fetch("health", &RequestInfo::new("web"), index).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!reader.is_finished());

        let next = p.set("health", "web", serde_json::json!("b")).await.unwrap();
        let fetched = reader.await.unwrap();
        assert_eq!(fetched.meta.index, next);
        assert_eq!(fetched.value, Some(serde_json::json!("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_fetch_times_out_with_current_value() {
        let p = provider();
        let index = p.set("health", "web", serde_json::json!("a")).await.unwrap();

        let request = RequestInfo::new("web").with_timeout(Duration::from_secs(30));
        let started = Instant::now();
        let fetched = p.fetch("health", &request, index).await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(fetched.meta.index, index);
        assert!(fetched.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_fetch_wakes_on_error() {
        let p = Arc::new(provider());
        let index = p.set("health", "web", serde_json::json!("a")).await.unwrap();

        let reader = {
            let p = p.clone();
            tokio::spawn(async move { p.fetch("health", &RequestInfo::new("web"), index).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        p.set_error("health", "web", NotifyError::Fetch("upstream down".into()))
            .await
            .unwrap();
        let fetched = reader.await.unwrap();

        assert_eq!(fetched.meta.index, index);
        assert_eq!(fetched.value, Some(serde_json::json!("a")));
        assert_eq!(fetched.error, Some(NotifyError::Fetch("upstream down".into())));

        p.clear_error("health", "web").await;
        let fetched = p.fetch("health", &RequestInfo::new("web"), 0).await;
        assert!(fetched.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_fetch_ignores_min_index() {
        let p = provider();
        let index = p.set("catalog", "db", serde_json::json!([1, 2])).await.unwrap();

        let started = Instant::now();
        let fetched = p.fetch("catalog", &RequestInfo::new("db"), index).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(fetched.meta.index, index);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_tracks_refresh_time() {
        let p = provider();
        p.set("catalog", "db", serde_json::json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        let fetched = p.fetch("catalog", &RequestInfo::new("db"), 0).await;
        assert!(fetched.meta.age >= Duration::from_secs(12));
        assert!(fetched.meta.age < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_read_refreshes_at_max_age() {
        let p = provider();
        let index = p.set("catalog", "db", serde_json::json!(1)).await.unwrap();
        let request = RequestInfo::new("db").with_max_age(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(4)).await;
        let fetched = p.fetch("catalog", &request, 0).await;
        assert_eq!(fetched.meta.age, Duration::from_secs(4));
        assert!(fetched.meta.hit);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let fetched = p.fetch("catalog", &request, 0).await;
        assert_eq!(fetched.meta.age, Duration::ZERO);
        assert!(!fetched.meta.hit);
        assert_eq!(fetched.meta.index, index);
        assert_eq!(fetched.value, Some(serde_json::json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_waits_for_change() {
        let p = Arc::new(provider());
        let index = p.set("health", "web", serde_json::json!("a")).await.unwrap();

        let reader = {
            let p = p.clone();
            tokio::spawn(async move {
                let request = RequestInfo::new("web").with_timeout(Duration::MAX);
                p.fetch("health", &request, index).await
            })
        };
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!reader.is_finished());

        let next = p.set("health", "web", serde_json::json!("b")).await.unwrap();
        let fetched = reader.await.unwrap();
        assert_eq!(fetched.meta.index, next);
        assert_eq!(fetched.value, Some(serde_json::json!("b")));
    }

    #[tokio::test]
    async fn test_fetching_missing_keys_stores_nothing() {
        let p = provider();
        for i in 0..1000 {
            let key = format!("svc.{}", i);
            let fetched = p.fetch("health", &RequestInfo::new(key.clone()), 0).await;
            assert_eq!(fetched.meta.index, 0);
            assert!(fetched.value.is_none());
            assert!(!fetched.meta.hit);
            p.fetch("catalog", &RequestInfo::new(key), 7).await;
        }

        assert_eq!(p.len().await, 0);
        assert!(p.is_empty().await);
        assert!(p.entries.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_wait_on_missing_key_is_pruned() {
        let p = provider();
        let request = RequestInfo::new("web").with_timeout(Duration::from_secs(5));

        let fetched = p.fetch("health", &request, 3).await;
        assert_eq!(fetched.meta.index, 0);
        assert!(fetched.value.is_none());
        assert!(p.entries.read().await.is_empty());

        // A removed key does not come back after a reader gives up on it
        p.set("health", "db", serde_json::json!(1)).await.unwrap();
        assert!(p.remove("health", "db").await);
        p.fetch("health", &RequestInfo::new("db").with_timeout(Duration::from_secs(5)), 1)
            .await;
        assert!(p.entries.read().await.is_empty());
        assert!(!p.remove("health", "db").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_is_swept() {
        let p = Arc::new(provider());
        let reader = {
            let p = p.clone();
            tokio::spawn(async move { p.fetch("health", &RequestInfo::new("gone"), 1).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        reader.abort();
        assert!(reader.await.is_err());
        assert_eq!(p.entries.read().await.len(), 1);

        let request = RequestInfo::new("other").with_timeout(Duration::from_secs(1));
        p.fetch("health", &request, 1).await;
        assert!(p.entries.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_reflects_value_written_while_parked() {
        let p = Arc::new(provider());
        p.set("health", "db", serde_json::json!("x")).await.unwrap();

        let reader = {
            let p = p.clone();
            tokio::spawn(async move { p.fetch("health", &RequestInfo::new("web"), 1).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        // The parked reader's placeholder is not a stored entry
        assert_eq!(p.len().await, 1);

        let index = p.set("health", "web", serde_json::json!("a")).await.unwrap();
        let fetched = reader.await.unwrap();
        assert_eq!(fetched.meta.index, index);
        assert!(fetched.meta.hit);
        assert_eq!(p.len().await, 2);
    }

    #[tokio::test]
    async fn test_clear_error_on_unset_key_leaves_nothing() {
        let p = provider();
        p.set_error("health", "web", NotifyError::Fetch("down".into()))
            .await
            .unwrap();
        assert_eq!(p.len().await, 1);

        p.clear_error("health", "web").await;
        assert!(p.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_with_index_in_place() {
        let p = provider();
        p.set_with_index("catalog", "db", serde_json::json!("v1"), 9).await.unwrap();
        p.set_with_index("catalog", "db", serde_json::json!("v2"), 9).await.unwrap();

        let fetched = p.fetch("catalog", &RequestInfo::new("db"), 0).await;
        assert_eq!(fetched.meta.index, 9);
        assert_eq!(fetched.value, Some(serde_json::json!("v2")));

        // Global counter moves past explicit indexes
        let next = p.set("catalog", "other", serde_json::json!(0)).await.unwrap();
        assert_eq!(next, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_wakes_blocked_reader() {
        let p = Arc::new(provider());
        let index = p.set("health", "web", serde_json::json!("a")).await.unwrap();

        let reader = {
            let p = p.clone();
            tokio::spawn(async move { p.fetch("health", &RequestInfo::new("web"), index).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(p.remove("health", "web").await);
        let fetched = reader.await.unwrap();
        assert!(fetched.value.is_none());
        assert_eq!(fetched.meta.index, 0);
        assert!(p.is_empty().await);
    }
}
