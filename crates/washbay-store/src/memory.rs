//! In-process implementation of the durable stores.
//!
//! Useful for hosts without a writable filesystem and for tests. It can be
//! switched unavailable to exercise failure paths, and it counts bucket
//! reads and writes so callers can assert that a request never touched the
//! cache.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use washbay_common::now_millis;

use crate::{
    new_idempotency_key, BucketStore, CacheEntry, MutationId, MutationStore, PendingMutation,
    StoreError, StoreResult,
};

#[derive(Debug)]
struct Bucket {
    name: String,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Default)]
struct MemoryState {
    mutations: BTreeMap<MutationId, PendingMutation>,
    dead: BTreeMap<MutationId, PendingMutation>,
    next_id: i64,
    buckets: Vec<Bucket>,
}

impl MemoryState {
    fn bucket(&self, name: &str) -> Option<&Bucket> {
        self.buckets.iter().find(|b| b.name == name)
    }

    fn bucket_mut(&mut self, name: &str) -> &mut Bucket {
        let index = match self.buckets.iter().position(|b| b.name == name) {
            Some(index) => index,
            None => {
                self.buckets.push(Bucket {
                    name: name.to_string(),
                    entries: HashMap::new(),
                });
                self.buckets.len() - 1
            }
        };
        &mut self.buckets[index]
    }
}

/// Snapshot of bucket access counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessCounts {
    pub reads: usize,
    pub writes: usize,
}

/// Durable-store stand-in held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            available: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Bucket reads and writes since creation.
    pub fn access_counts(&self) -> AccessCounts {
        AccessCounts {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store switched off"));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::unavailable("memory store lock poisoned"))
    }

    fn read(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.lock()
    }

    fn write(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock()
    }
}

#[async_trait]
impl MutationStore for MemoryStore {
    async fn enqueue_with_key(
        &self,
        payload: JsonValue,
        idempotency_key: Option<String>,
    ) -> StoreResult<MutationId> {
        let mut state = self.lock()?;
        let id = MutationId(state.next_id);
        state.next_id += 1;
        state.mutations.insert(
            id,
            PendingMutation {
                id,
                payload,
                idempotency_key: idempotency_key.unwrap_or_else(new_idempotency_key),
                attempts: 0,
                enqueued_at: now_millis(),
            },
        );
        Ok(id)
    }

    async fn list_all(&self) -> StoreResult<Vec<PendingMutation>> {
        Ok(self.lock()?.mutations.values().cloned().collect())
    }

    async fn remove(&self, id: MutationId) -> StoreResult<()> {
        self.lock()?.mutations.remove(&id);
        Ok(())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.mutations.len())
    }

    async fn record_attempt(&self, id: MutationId) -> StoreResult<()> {
        if let Some(mutation) = self.lock()?.mutations.get_mut(&id) {
            mutation.attempts += 1;
        }
        Ok(())
    }

    async fn dead_letter(&self, id: MutationId) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.mutations.remove(&id) {
            Some(mutation) => {
                state.dead.insert(id, mutation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn dead_letters(&self) -> StoreResult<Vec<PendingMutation>> {
        Ok(self.lock()?.dead.values().cloned().collect())
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn open(&self, name: &str) -> StoreResult<()> {
        self.write()?.bucket_mut(name);
        Ok(())
    }

    async fn has(&self, name: &str) -> StoreResult<bool> {
        Ok(self.read()?.bucket(name).is_some())
    }

    async fn names(&self) -> StoreResult<Vec<String>> {
        Ok(self.read()?.buckets.iter().map(|b| b.name.clone()).collect())
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let mut state = self.write()?;
        let before = state.buckets.len();
        state.buckets.retain(|b| b.name != name);
        Ok(state.buckets.len() != before)
    }

    async fn match_in(&self, name: &str, key: &str) -> StoreResult<Option<CacheEntry>> {
        let state = self.read()?;
        Ok(state
            .bucket(name)
            .and_then(|b| b.entries.get(key))
            .cloned())
    }

    async fn match_any(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let state = self.read()?;
        Ok(state
            .buckets
            .iter()
            .find_map(|b| b.entries.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> StoreResult<()> {
        let mut state = self.write()?;
        state
            .bucket_mut(name)
            .entries
            .insert(entry.url.clone(), entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        let mut state = self.write()?;
        let bucket = state.bucket_mut(name);
        for entry in entries {
            bucket.entries.insert(entry.url.clone(), entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(url: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            cached_at: 0,
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_ordering() {
        let store = MemoryStore::new();
        let a = store.enqueue(json!({"n": 1})).await.unwrap();
        let b = store.enqueue(json!({"n": 2})).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(all[1].payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_remove() {
        let store = MemoryStore::new();
        let a = store.enqueue(json!(1)).await.unwrap();
        store.remove(a).await.unwrap();
        let b = store.enqueue(json!(2)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.enqueue(json!({})).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert!(store.enqueue(json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_access_counts_track_bucket_io() {
        let store = MemoryStore::new();
        assert_eq!(store.access_counts(), AccessCounts::default());

        store.put("dyn", entry("http://localhost/a")).await.unwrap();
        store.match_any("http://localhost/a").await.unwrap();

        assert_eq!(store.access_counts(), AccessCounts { reads: 1, writes: 1 });
    }

    #[tokio::test]
    async fn test_match_any_uses_creation_order() {
        let store = MemoryStore::new();
        let mut old = entry("http://localhost/x");
        old.status = 201;
        store.put("first", old).await.unwrap();
        store.put("second", entry("http://localhost/x")).await.unwrap();

        let hit = store.match_any("http://localhost/x").await.unwrap().unwrap();
        assert_eq!(hit.status, 201);
    }
}
