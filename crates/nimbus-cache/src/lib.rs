//! Persistent snapshot cache for Nimbus
//!
//! TTL-aware, schema-versioned SQLite store with stale-while-revalidate
//! freshness classification.

pub mod store;

pub use store::{CacheEntry, CacheStore, Freshness, SNAPSHOT_SCHEMA_VERSION};

use thiserror::Error;

/// Cache persistence errors. These stay inside the orchestration layer;
/// callers see at most a generic cache failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
