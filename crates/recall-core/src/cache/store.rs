//! Persistent backing store for cache tiers.
//!
//! Rows hold the serialized response text exactly as the in-memory tiers keep
//! it, so a payload written here decodes the same way on read.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::cache::response::CacheTier;
use crate::errors::RecallResult;

/// Current cache store schema version.
const STORE_SCHEMA_VERSION: i64 = 1;

const STORE_SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cache_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS cache_entries (
        cache_key TEXT PRIMARY KEY,
        tier TEXT NOT NULL,
        payload TEXT NOT NULL,
        expires_at_ms INTEGER NOT NULL,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry ON cache_entries(expires_at_ms);",
];

/// One persisted cache row.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEntry {
    pub tier: CacheTier,
    pub payload: String,
    pub expires_at: DateTime<Utc>,
}

/// Storage seam behind the deterministic cache tiers.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &str) -> RecallResult<Option<StoredEntry>>;
    fn save(&self, key: &str, entry: &StoredEntry) -> RecallResult<()>;
    fn delete(&self, key: &str) -> RecallResult<()>;
    /// All rows, for scans such as file-based invalidation.
    fn entries(&self) -> RecallResult<Vec<(String, StoredEntry)>>;
    fn purge_expired(&self, now: DateTime<Utc>) -> RecallResult<usize>;
    fn clear(&self) -> RecallResult<()>;
}

// ---------------------------------------------------------------------------
// SqliteCacheStore
// ---------------------------------------------------------------------------

/// SQLite-backed `CacheStore`.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

fn get_schema_version(conn: &Connection) -> i64 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM cache_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i64>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i64) -> RecallResult<()> {
    conn.execute(
        "INSERT INTO cache_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![version.to_string()],
    )?;
    Ok(())
}

fn migrate_schema(conn: &Connection) -> RecallResult<()> {
    let mut current = get_schema_version(conn);
    while current < STORE_SCHEMA_VERSION {
        let next = current + 1;
        // Version 1: initial schema created by STORE_SCHEMA_STATEMENTS.
        set_schema_version(conn, next)?;
        current = next;
    }
    Ok(())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_entry(tier: String, payload: String, expires_at_ms: i64) -> Option<StoredEntry> {
    Some(StoredEntry {
        tier: CacheTier::parse(&tier)?,
        payload,
        expires_at: millis_to_datetime(expires_at_ms),
    })
}

impl SqliteCacheStore {
    pub fn open(path: &Path) -> RecallResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> RecallResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> RecallResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL;").ok();
        for stmt in STORE_SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        migrate_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> i64 {
        get_schema_version(&self.conn.lock())
    }
}

impl CacheStore for SqliteCacheStore {
    fn load(&self, key: &str) -> RecallResult<Option<StoredEntry>> {
        let conn = self.conn.lock();
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT tier, payload, expires_at_ms FROM cache_entries WHERE cache_key = ?1;",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        Ok(row.and_then(|(tier, payload, expires)| row_to_entry(tier, payload, expires)))
    }

    fn save(&self, key: &str, entry: &StoredEntry) -> RecallResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cache_entries(cache_key, tier, payload, expires_at_ms) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(cache_key) DO UPDATE SET \
                tier = excluded.tier, \
                payload = excluded.payload, \
                expires_at_ms = excluded.expires_at_ms, \
                updated_at = CURRENT_TIMESTAMP;",
            params![
                key,
                entry.tier.as_str(),
                entry.payload,
                entry.expires_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> RecallResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries WHERE cache_key = ?1;", params![key])?;
        Ok(())
    }

    fn entries(&self) -> RecallResult<Vec<(String, StoredEntry)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT cache_key, tier, payload, expires_at_ms FROM cache_entries ORDER BY cache_key;",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(key, tier, payload, expires)| {
                row_to_entry(tier, payload, expires).map(|entry| (key, entry))
            })
            .collect();
        Ok(rows)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> RecallResult<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at_ms <= ?1;",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }

    fn clear(&self) -> RecallResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries;", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(payload: &str, expires_at: DateTime<Utc>) -> StoredEntry {
        StoredEntry {
            tier: CacheTier::L2,
            payload: payload.to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_fresh_store_migrates() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version(), STORE_SCHEMA_VERSION);
    }

    #[test]
    fn test_save_load_overwrite() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let expires = DateTime::<Utc>::from_timestamp_millis(1_800_000_000_000).unwrap();
        store.save("k1", &entry("first", expires)).unwrap();
        store.save("k1", &entry("second", expires)).unwrap();
        let loaded = store.load("k1").unwrap().unwrap();
        assert_eq!(loaded.payload, "second");
        assert_eq!(loaded.expires_at, expires);
        assert_eq!(loaded.tier, CacheTier::L2);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_purge_expired_and_delete() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.save("old", &entry("a", now - Duration::seconds(5))).unwrap();
        store.save("new", &entry("b", now + Duration::seconds(60))).unwrap();
        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert_eq!(store.entries().unwrap().len(), 1);
        store.delete("new").unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("responses.db");
        let expires = Utc::now() + Duration::hours(1);
        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store.save("k", &entry("payload", expires)).unwrap();
        }
        let reopened = SqliteCacheStore::open(&path).unwrap();
        assert_eq!(reopened.load("k").unwrap().unwrap().payload, "payload");
        reopened.clear().unwrap();
        assert!(reopened.load("k").unwrap().is_none());
    }
}
