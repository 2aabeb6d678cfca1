use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::{debug, info};
use washbay_common::now_millis;

use crate::{CacheEntry, MutationId, PendingMutation, StoreError, StoreResult};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Initialize or open the store database at `path`
pub fn init_database(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    prepare(conn)
}

/// Open a private in-memory database
pub fn init_memory_database() -> StoreResult<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(conn)
}

fn prepare(conn: Connection) -> StoreResult<Connection> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    let version = current_version(&conn)?;
    if version < SCHEMA_VERSION {
        migrate_database(&conn, version)?;
    }

    Ok(conn)
}

/// Schema version recorded in the database, 0 for a fresh file
pub fn current_version(conn: &Connection) -> StoreResult<i32> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get::<_, i32>(0).map(|count| count > 0),
    )?;

    if !table_exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Run database migrations
fn migrate_database(conn: &Connection, from_version: i32) -> StoreResult<()> {
    if from_version < 1 {
        create_schema(conn)?;
    }

    Ok(())
}

/// Create the current schema
fn create_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_mutations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload TEXT NOT NULL,
            idempotency_key TEXT NOT NULL DEFAULT '',
            attempts INTEGER NOT NULL DEFAULT 0,
            enqueued_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS dead_mutations (
            id INTEGER PRIMARY KEY,
            payload TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL,
            dead_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_buckets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cache_entries (
            bucket_id INTEGER NOT NULL REFERENCES cache_buckets(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            status INTEGER NOT NULL,
            status_text TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (bucket_id, url)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_url ON cache_entries(url);
        "#,
    )
    .map_err(|e| StoreError::Migration(format!("Failed to create schema: {}", e)))?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, now_millis()],
    )?;

    info!(version = SCHEMA_VERSION, "Created store schema");
    Ok(())
}

// ==================== Mutations ====================

/// Insert a pending mutation and return its id
pub fn insert_mutation(
    conn: &Connection,
    payload: &JsonValue,
    idempotency_key: &str,
) -> StoreResult<MutationId> {
    let payload = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO pending_mutations (payload, idempotency_key, attempts, enqueued_at)
         VALUES (?1, ?2, 0, ?3)",
        params![payload, idempotency_key, now_millis()],
    )?;
    Ok(MutationId(conn.last_insert_rowid()))
}

fn mutation_columns(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, u32, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_mutation(
    (id, payload, idempotency_key, attempts, enqueued_at): (i64, String, String, u32, i64),
) -> StoreResult<PendingMutation> {
    Ok(PendingMutation {
        id: MutationId(id),
        payload: serde_json::from_str(&payload)?,
        idempotency_key,
        attempts,
        enqueued_at,
    })
}

/// All pending mutations, ascending by id
pub fn list_mutations(conn: &Connection) -> StoreResult<Vec<PendingMutation>> {
    let mut stmt = conn.prepare(
        "SELECT id, payload, idempotency_key, attempts, enqueued_at
         FROM pending_mutations ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], mutation_columns)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(into_mutation).collect()
}

/// All dead-lettered mutations, ascending by id
pub fn list_dead_mutations(conn: &Connection) -> StoreResult<Vec<PendingMutation>> {
    let mut stmt = conn.prepare(
        "SELECT id, payload, idempotency_key, attempts, enqueued_at
         FROM dead_mutations ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], mutation_columns)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(into_mutation).collect()
}

/// Delete a pending mutation, returning whether a row was removed
pub fn delete_mutation(conn: &Connection, id: MutationId) -> StoreResult<bool> {
    let changed = conn.execute("DELETE FROM pending_mutations WHERE id = ?1", params![id.0])?;
    Ok(changed > 0)
}

/// Count pending mutations
pub fn count_mutations(conn: &Connection) -> StoreResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| {
        row.get(0)
    })?;
    Ok(count.max(0) as usize)
}

/// Increment the attempt counter of a pending mutation
pub fn increment_attempts(conn: &Connection, id: MutationId) -> StoreResult<()> {
    conn.execute(
        "UPDATE pending_mutations SET attempts = attempts + 1 WHERE id = ?1",
        params![id.0],
    )?;
    Ok(())
}

/// Move a pending mutation into the dead-letter table
pub fn move_to_dead_letter(conn: &mut Connection, id: MutationId) -> StoreResult<bool> {
    let tx = conn.transaction()?;
    let copied = tx.execute(
        "INSERT OR REPLACE INTO dead_mutations
             (id, payload, idempotency_key, attempts, enqueued_at, dead_at)
         SELECT id, payload, idempotency_key, attempts, enqueued_at, ?2
         FROM pending_mutations WHERE id = ?1",
        params![id.0, now_millis()],
    )?;
    tx.execute("DELETE FROM pending_mutations WHERE id = ?1", params![id.0])?;
    tx.commit()?;
    Ok(copied > 0)
}

// ==================== Buckets ====================

/// Get a bucket id, creating the bucket if needed
pub fn ensure_bucket(conn: &Connection, name: &str) -> StoreResult<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO cache_buckets (name, created_at) VALUES (?1, ?2)",
        params![name, now_millis()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM cache_buckets WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Look up a bucket id
pub fn bucket_id(conn: &Connection, name: &str) -> StoreResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM cache_buckets WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Bucket names in creation order
pub fn bucket_names(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM cache_buckets ORDER BY id ASC")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Delete a bucket and its entries
pub fn delete_bucket(conn: &mut Connection, name: &str) -> StoreResult<bool> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM cache_entries WHERE bucket_id IN (SELECT id FROM cache_buckets WHERE name = ?1)",
        params![name],
    )?;
    let removed = tx.execute("DELETE FROM cache_buckets WHERE name = ?1", params![name])?;
    tx.commit()?;

    if removed > 0 {
        debug!(bucket = name, "Deleted cache bucket");
    }
    Ok(removed > 0)
}

/// Insert or replace an entry in a bucket
pub fn upsert_entry(conn: &Connection, bucket_id: i64, entry: &CacheEntry) -> StoreResult<()> {
    let headers = serde_json::to_string(&entry.headers)?;
    conn.execute(
        "INSERT OR REPLACE INTO cache_entries
             (bucket_id, url, method, status, status_text, headers, body, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            bucket_id,
            entry.url,
            entry.method,
            entry.status,
            entry.status_text,
            headers,
            entry.body,
            entry.cached_at,
        ],
    )?;
    Ok(())
}

type EntryColumns = (String, String, u16, String, String, Vec<u8>, i64);

fn entry_columns(row: &Row<'_>) -> rusqlite::Result<EntryColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_entry(
    (url, method, status, status_text, headers, body, cached_at): EntryColumns,
) -> StoreResult<CacheEntry> {
    Ok(CacheEntry {
        url,
        method,
        status,
        status_text,
        headers: serde_json::from_str(&headers)?,
        body,
        cached_at,
    })
}

/// Find an entry in one bucket
pub fn find_entry(conn: &Connection, bucket: &str, url: &str) -> StoreResult<Option<CacheEntry>> {
    let columns = conn
        .query_row(
            "SELECT e.url, e.method, e.status, e.status_text, e.headers, e.body, e.cached_at
             FROM cache_entries e JOIN cache_buckets b ON b.id = e.bucket_id
             WHERE b.name = ?1 AND e.url = ?2",
            params![bucket, url],
            entry_columns,
        )
        .optional()?;
    columns.map(into_entry).transpose()
}

/// Find an entry in any bucket, oldest bucket first
pub fn find_entry_any(conn: &Connection, url: &str) -> StoreResult<Option<CacheEntry>> {
    let columns = conn
        .query_row(
            "SELECT e.url, e.method, e.status, e.status_text, e.headers, e.body, e.cached_at
             FROM cache_entries e JOIN cache_buckets b ON b.id = e.bucket_id
             WHERE e.url = ?1 ORDER BY b.id ASC LIMIT 1",
            params![url],
            entry_columns,
        )
        .optional()?;
    columns.map(into_entry).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;
    use tempfile::tempdir;

    fn entry(url: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::from([("content-type".to_string(), "text/css".to_string())]),
            body: b"body{}".to_vec(),
            cached_at: 1,
        }
    }

    #[test]
    fn test_fresh_database_is_current_version() {
        let conn = init_memory_database().unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_does_not_remigrate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        let conn = init_database(&path).unwrap();
        insert_mutation(&conn, &serde_json::json!({"a": 1}), "k1").unwrap();
        drop(conn);

        let conn = init_database(&path).unwrap();
        assert_eq!(count_mutations(&conn).unwrap(), 1);
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_unversioned_file_reports_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);

        let conn = prepare(conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_autoincrement_never_reuses_ids() {
        let conn = init_memory_database().unwrap();
        let first = insert_mutation(&conn, &serde_json::json!(1), "a").unwrap();
        delete_mutation(&conn, first).unwrap();
        let second = insert_mutation(&conn, &serde_json::json!(2), "b").unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_dead_letter_moves_row() {
        let mut conn = init_memory_database().unwrap();
        let id = insert_mutation(&conn, &serde_json::json!({"x": true}), "k").unwrap();
        increment_attempts(&conn, id).unwrap();

        assert!(move_to_dead_letter(&mut conn, id).unwrap());
        assert_eq!(count_mutations(&conn).unwrap(), 0);

        let dead = list_dead_mutations(&conn).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);
        assert_eq!(dead[0].attempts, 1);

        assert!(!move_to_dead_letter(&mut conn, MutationId(999)).unwrap());
    }

    #[test]
    fn test_bucket_entries_cascade_on_delete() {
        let mut conn = init_memory_database().unwrap();
        let id = ensure_bucket(&conn, "washbay-static-v1").unwrap();
        upsert_entry(&conn, id, &entry("http://localhost/app.css")).unwrap();

        assert!(find_entry(&conn, "washbay-static-v1", "http://localhost/app.css")
            .unwrap()
            .is_some());
        assert!(delete_bucket(&mut conn, "washbay-static-v1").unwrap());
        assert!(find_entry_any(&conn, "http://localhost/app.css")
            .unwrap()
            .is_none());
        assert!(!delete_bucket(&mut conn, "washbay-static-v1").unwrap());
    }

    #[test]
    fn test_find_entry_any_prefers_oldest_bucket() {
        let conn = init_memory_database().unwrap();
        let old = ensure_bucket(&conn, "old").unwrap();
        let new = ensure_bucket(&conn, "new").unwrap();

        let mut a = entry("http://localhost/x");
        a.body = b"old".to_vec();
        let mut b = entry("http://localhost/x");
        b.body = b"new".to_vec();
        upsert_entry(&conn, new, &b).unwrap();
        upsert_entry(&conn, old, &a).unwrap();

        let found = find_entry_any(&conn, "http://localhost/x").unwrap().unwrap();
        assert_eq!(found.body, b"old".to_vec());
        assert_eq!(bucket_names(&conn).unwrap(), vec!["old", "new"]);
    }
}
