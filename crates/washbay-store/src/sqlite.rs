//! SQLite-backed implementation of the durable stores.

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::database;
use crate::{
    new_idempotency_key, BucketStore, CacheEntry, MutationId, MutationStore, PendingMutation,
    StoreError, StoreResult,
};

/// Durable store over a single SQLite connection.
///
/// Each trait call runs as one transaction on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = database::init_database(path)?;
        debug!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = database::init_memory_database()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        trace!(op, "Store transaction");
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::unavailable("connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::unavailable(format!("{op} task failed: {e}")))?
    }
}

#[async_trait]
impl MutationStore for SqliteStore {
    async fn enqueue_with_key(
        &self,
        payload: JsonValue,
        idempotency_key: Option<String>,
    ) -> StoreResult<MutationId> {
        let key = idempotency_key.unwrap_or_else(new_idempotency_key);
        self.with_conn("enqueue", move |conn| {
            database::insert_mutation(conn, &payload, &key)
        })
        .await
    }

    async fn list_all(&self) -> StoreResult<Vec<PendingMutation>> {
        self.with_conn("list_all", |conn| database::list_mutations(conn))
            .await
    }

    async fn remove(&self, id: MutationId) -> StoreResult<()> {
        self.with_conn("remove", move |conn| {
            database::delete_mutation(conn, id).map(|_| ())
        })
        .await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.with_conn("count", |conn| database::count_mutations(conn))
            .await
    }

    async fn record_attempt(&self, id: MutationId) -> StoreResult<()> {
        self.with_conn("record_attempt", move |conn| {
            database::increment_attempts(conn, id)
        })
        .await
    }

    async fn dead_letter(&self, id: MutationId) -> StoreResult<bool> {
        self.with_conn("dead_letter", move |conn| {
            database::move_to_dead_letter(conn, id)
        })
        .await
    }

    async fn dead_letters(&self) -> StoreResult<Vec<PendingMutation>> {
        self.with_conn("dead_letters", |conn| database::list_dead_mutations(conn))
            .await
    }
}

#[async_trait]
impl BucketStore for SqliteStore {
    async fn open(&self, name: &str) -> StoreResult<()> {
        let name = name.to_string();
        self.with_conn("open", move |conn| {
            database::ensure_bucket(conn, &name).map(|_| ())
        })
        .await
    }

    async fn has(&self, name: &str) -> StoreResult<bool> {
        let name = name.to_string();
        self.with_conn("has", move |conn| {
            database::bucket_id(conn, &name).map(|id| id.is_some())
        })
        .await
    }

    async fn names(&self) -> StoreResult<Vec<String>> {
        self.with_conn("names", |conn| database::bucket_names(conn))
            .await
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let name = name.to_string();
        self.with_conn("delete", move |conn| database::delete_bucket(conn, &name))
            .await
    }

    async fn match_in(&self, name: &str, key: &str) -> StoreResult<Option<CacheEntry>> {
        let (name, key) = (name.to_string(), key.to_string());
        self.with_conn("match_in", move |conn| {
            database::find_entry(conn, &name, &key)
        })
        .await
    }

    async fn match_any(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn("match_any", move |conn| {
            database::find_entry_any(conn, &key)
        })
        .await
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> StoreResult<()> {
        let name = name.to_string();
        self.with_conn("put", move |conn| {
            let tx = conn.transaction()?;
            let bucket = database::ensure_bucket(&tx, &name)?;
            database::upsert_entry(&tx, bucket, &entry)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        let name = name.to_string();
        self.with_conn("put_all", move |conn| {
            let tx = conn.transaction()?;
            let bucket = database::ensure_bucket(&tx, &name)?;
            for entry in &entries {
                database::upsert_entry(&tx, bucket, entry)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(url: &str, body: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
            cached_at: 0,
        }
    }

    #[tokio::test]
    async fn test_enqueue_list_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let payload = json!({"service": "deluxe", "slot": "2026-10-14T09:00"});

        let id = store.enqueue(payload.clone()).await.unwrap();
        let all = store.list_all().await.unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].payload, payload);
        assert!(!all[0].idempotency_key.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_ascending_by_id() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store.enqueue(json!("a")).await.unwrap();
        let b = store.enqueue(json!("b")).await.unwrap();
        let c = store.enqueue(json!("c")).await.unwrap();

        let ids: Vec<_> = store.list_all().await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_noop() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.enqueue(json!({})).await.unwrap();

        store.remove(MutationId(id.raw() + 100)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.remove(id).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_caller_supplied_idempotency_key() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .enqueue_with_key(json!({}), Some("booking-42".to_string()))
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all[0].idempotency_key, "booking-42");
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("washbay.db");

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.enqueue(json!({"car": "sedan"})).await.unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
    }

    #[tokio::test]
    async fn test_record_attempt_and_dead_letter() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.enqueue(json!({})).await.unwrap();

        store.record_attempt(id).await.unwrap();
        store.record_attempt(id).await.unwrap();
        assert_eq!(store.list_all().await.unwrap()[0].attempts, 2);

        assert!(store.dead_letter(id).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.dead_letters().await.unwrap()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(!BucketStore::has(&store, "washbay-static-v1").await.unwrap());
        BucketStore::open(&store, "washbay-static-v1").await.unwrap();
        BucketStore::open(&store, "washbay-static-v1").await.unwrap();
        assert_eq!(store.names().await.unwrap(), vec!["washbay-static-v1"]);

        store
            .put("washbay-static-v1", entry("http://localhost/", "root"))
            .await
            .unwrap();
        let hit = store
            .match_in("washbay-static-v1", "http://localhost/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"root".to_vec());

        assert!(BucketStore::delete(&store, "washbay-static-v1").await.unwrap());
        assert!(store.match_any("http://localhost/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_entry() {
        let store = SqliteStore::in_memory().unwrap();
        store.put("dyn", entry("http://localhost/a", "v1")).await.unwrap();
        store.put("dyn", entry("http://localhost/a", "v2")).await.unwrap();

        let hit = store.match_in("dyn", "http://localhost/a").await.unwrap().unwrap();
        assert_eq!(hit.body, b"v2".to_vec());
    }

    #[tokio::test]
    async fn test_put_all_writes_every_entry() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .put_all(
                "shell",
                vec![entry("http://localhost/", "a"), entry("http://localhost/app.js", "b")],
            )
            .await
            .unwrap();

        assert!(store.match_in("shell", "http://localhost/").await.unwrap().is_some());
        assert!(store.match_in("shell", "http://localhost/app.js").await.unwrap().is_some());
        assert!(store.match_in("other", "http://localhost/").await.unwrap().is_none());
    }
}
