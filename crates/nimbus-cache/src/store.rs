//! SQLite-backed persistent cache of fused weather snapshots.
//!
//! Keys are request fingerprints. Writes go through a compare-and-swap on
//! `fetched_at` so a slower cycle can never overwrite a newer result, and
//! reads never return entries past their hard `max_age` cutoff.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

use nimbus_core::types::{Fingerprint, WeatherSnapshot};

use crate::CacheError;

/// Bump when the serialized snapshot shape changes; mismatched entries are
/// purged at startup instead of being misread across versions.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// One stored snapshot with its freshness bounds.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub snapshot: WeatherSnapshot,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub max_age: Duration,
    pub schema_version: u32,
}

/// Stale-while-revalidate classification. Entries past max_age are never
/// classified; `get` refuses to return them at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within ttl: serve, no fetch.
    Fresh,
    /// Past ttl but inside max_age: serve and refresh in the background.
    Stale,
}

impl CacheEntry {
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        let age = now.signed_duration_since(self.fetched_at);
        if age.num_milliseconds() < self.ttl.as_millis() as i64 {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }
}

/// SQLite store for fused snapshots.
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open (or create) the cache at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                fingerprint TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                fetched_at_ms INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL,
                max_age_secs INTEGER NOT NULL,
                schema_version INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_fetched ON snapshots(fetched_at_ms);
            "#,
        )?;
        Ok(())
    }

    /// Look up an entry. Entries past max_age are deleted and reported as
    /// absent; undecodable rows are treated the same way rather than
    /// surfacing a corruption error to the caller.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT snapshot, fetched_at_ms, ttl_secs, max_age_secs, schema_version
                 FROM snapshots WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((snapshot_json, fetched_at_ms, ttl_secs, max_age_secs, schema_version)) = row
        else {
            return Ok(None);
        };

        let now_ms = Utc::now().timestamp_millis();
        if fetched_at_ms + max_age_secs * 1000 <= now_ms {
            conn.execute(
                "DELETE FROM snapshots WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
            )?;
            return Ok(None);
        }

        let snapshot: WeatherSnapshot = match serde_json::from_str(&snapshot_json) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%fingerprint, %e, "dropping undecodable cache entry");
                conn.execute(
                    "DELETE FROM snapshots WHERE fingerprint = ?1",
                    params![fingerprint.as_str()],
                )?;
                return Ok(None);
            }
        };

        let fetched_at = Utc
            .timestamp_millis_opt(fetched_at_ms)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            snapshot,
            fetched_at,
            ttl: Duration::from_secs(ttl_secs.max(0) as u64),
            max_age: Duration::from_secs(max_age_secs.max(0) as u64),
            schema_version: schema_version.max(0) as u32,
        }))
    }

    /// Atomic replace guarded by the monotonic `fetched_at` invariant.
    /// Returns whether the row was written; a `false` means a newer entry
    /// already existed and the write was discarded.
    pub fn put(
        &self,
        fingerprint: &Fingerprint,
        snapshot: &WeatherSnapshot,
        fetched_at: DateTime<Utc>,
        ttl: Duration,
        max_age: Duration,
    ) -> Result<bool, CacheError> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let written = self.conn.lock().execute(
            r#"
            INSERT INTO snapshots
                (fingerprint, snapshot, fetched_at_ms, ttl_secs, max_age_secs, schema_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(fingerprint) DO UPDATE SET
                snapshot = excluded.snapshot,
                fetched_at_ms = excluded.fetched_at_ms,
                ttl_secs = excluded.ttl_secs,
                max_age_secs = excluded.max_age_secs,
                schema_version = excluded.schema_version
            WHERE excluded.fetched_at_ms >= snapshots.fetched_at_ms
            "#,
            params![
                fingerprint.as_str(),
                snapshot_json,
                fetched_at.timestamp_millis(),
                ttl.as_secs() as i64,
                max_age.as_secs() as i64,
                SNAPSHOT_SCHEMA_VERSION as i64,
            ],
        )?;
        if written == 0 {
            tracing::debug!(%fingerprint, "discarded stale write (newer entry present)");
        }
        Ok(written > 0)
    }

    /// Remove all entries past their hard max_age cutoff. Returns the
    /// number of rows removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let removed = self.conn.lock().execute(
            "DELETE FROM snapshots WHERE fetched_at_ms + max_age_secs * 1000 <= ?1",
            params![now_ms],
        )?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }

    /// Startup guard: drop every entry whose stored schema version differs
    /// from the running application's, rather than risk misreading the
    /// payload across versions. Returns the number of rows removed.
    pub fn invalidate_on_schema_mismatch(&self, current: u32) -> Result<usize, CacheError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM snapshots WHERE schema_version != ?1",
            params![current as i64],
        )?;
        if removed > 0 {
            tracing::info!(removed, current, "purged cache entries from other schema versions");
        }
        Ok(removed)
    }

    /// Number of stored entries (diagnostics and tests).
    pub fn len(&self) -> Result<usize, CacheError> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}
