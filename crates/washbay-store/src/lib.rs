//! # Washbay Store
//!
//! Durable state for the Washbay offline engine. The background worker may be
//! terminated between any two events, so everything that has to survive lives
//! behind the two repository traits defined here.
//!
//! ## Features
//!
//! - **MutationStore**: append-only queue of writes made while offline
//! - **BucketStore**: named cache buckets mapping request keys to responses
//! - **SqliteStore**: schema-versioned SQLite implementation of both
//! - **MemoryStore**: in-process implementation for tests and ephemeral hosts
//!
//! ## Architecture
//!
//! ```text
//! Engine handlers
//!     │
//!     ├── Arc<dyn MutationStore> ── pending_mutations / dead_mutations
//!     │
//!     └── Arc<dyn BucketStore> ──── cache_buckets
//!                                       └── cache_entries (url → response)
//! ```

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

pub mod database;
pub mod memory;
pub mod sqlite;

pub use memory::{AccessCounts, MemoryStore};
pub use sqlite::SqliteStore;

// ==================== Errors ====================

/// Errors raised by the durable stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ==================== Types ====================

/// Auto-increment identifier of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(pub i64);

impl MutationId {
    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A write queued while the backend was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: MutationId,

    /// Opaque payload supplied by the page.
    pub payload: JsonValue,

    /// Key the page forwards to the backend so replays can be deduplicated.
    pub idempotency_key: String,

    /// Drains that delivered this mutation to at least one client.
    pub attempts: u32,

    /// Enqueue time (ms since epoch).
    pub enqueued_at: i64,
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (the cache key).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

/// Generate a fresh idempotency key.
pub fn new_idempotency_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ==================== Traits ====================

/// Durable queue of offline writes.
///
/// Every call is its own atomic transaction; there is no cross-call locking.
#[async_trait]
pub trait MutationStore: Send + Sync {
    /// Append a payload and return its id.
    async fn enqueue(&self, payload: JsonValue) -> StoreResult<MutationId> {
        self.enqueue_with_key(payload, None).await
    }

    /// Append a payload with a caller-supplied idempotency key.
    async fn enqueue_with_key(
        &self,
        payload: JsonValue,
        idempotency_key: Option<String>,
    ) -> StoreResult<MutationId>;

    /// All pending mutations, ascending by id.
    async fn list_all(&self) -> StoreResult<Vec<PendingMutation>>;

    /// Remove a mutation. Removing an unknown id is a no-op.
    async fn remove(&self, id: MutationId) -> StoreResult<()>;

    /// Number of pending mutations.
    async fn count(&self) -> StoreResult<usize>;

    /// Increment the delivery attempt counter. No-op for unknown ids.
    async fn record_attempt(&self, id: MutationId) -> StoreResult<()>;

    /// Move a pending mutation to the dead-letter table.
    async fn dead_letter(&self, id: MutationId) -> StoreResult<bool>;

    /// Dead-lettered mutations, ascending by id.
    async fn dead_letters(&self) -> StoreResult<Vec<PendingMutation>>;
}

/// Durable, named cache buckets.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Create a bucket if it does not exist.
    async fn open(&self, name: &str) -> StoreResult<()>;

    /// Check if a bucket exists.
    async fn has(&self, name: &str) -> StoreResult<bool>;

    /// Bucket names in creation order.
    async fn names(&self) -> StoreResult<Vec<String>>;

    /// Delete a bucket and all its entries.
    async fn delete(&self, name: &str) -> StoreResult<bool>;

    /// Look up a key in one bucket.
    async fn match_in(&self, name: &str, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Look up a key across all buckets, oldest bucket first.
    async fn match_any(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Store an entry under `entry.url`, creating the bucket if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> StoreResult<()>;

    /// Store every entry or none of them.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> StoreResult<()>;
}
