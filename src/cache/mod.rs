//! Keyed store of fetched feeds with timestamps.
//!
//! The store itself never judges freshness: [`CacheStore::get`] hands back
//! whatever is stored and the caller compares `fetched_at` against its TTL.
//! Old records are only removed by an explicit [`CacheStore::prune`], which is
//! meant for a maintenance job rather than the request path.
//!
//! Two implementations are provided:
//!
//! - [`SqliteCache`] - a single SQLite file, shared between processes
//! - [`MemoryCache`] - process-local map, handy as a test double

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing storage could not be reached or queried
    #[error("Cache unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// Schema creation failed on open
    #[error("Cache migration failed: {0}")]
    Migration(String),

    /// A duration or timestamp could not be represented
    #[error("Invalid cache timestamp: {0}")]
    InvalidTimestamp(String),
}

// ============================================================================
// Data Structures
// ============================================================================

/// One stored value and when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub key: String,
    pub value: String,
    pub fetched_at: DateTime<Utc>,
}

impl CacheRecord {
    /// A record is fresh iff `now - fetched_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.fetched_at) < ttl,
            // A TTL too large for chrono never expires
            Err(_) => true,
        }
    }
}

/// Storage contract used by the mixer.
///
/// Implementations must tolerate concurrent `get`/`put` on the same key;
/// the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stored record for `key`, fresh or not.
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Insert or replace the record for `key`.
    async fn put(&self, key: &str, value: &str, fetched_at: DateTime<Utc>)
        -> Result<(), CacheError>;

    /// Delete every record fetched before `now - older_than`.
    ///
    /// Returns the number of records deleted.
    async fn prune(&self, older_than: Duration) -> Result<u64, CacheError>;
}

/// Cutoff instant for [`CacheStore::prune`].
pub(crate) fn prune_cutoff(older_than: Duration) -> Result<DateTime<Utc>, CacheError> {
    let span = chrono::Duration::from_std(older_than)
        .map_err(|e| CacheError::InvalidTimestamp(e.to_string()))?;
    Utc::now()
        .checked_sub_signed(span)
        .ok_or_else(|| CacheError::InvalidTimestamp(format!("{older_than:?} before now")))
}

/// Normalize a feed URL into its cache key.
///
/// Absolute URLs are re-serialized by the `url` crate (lowercase scheme and
/// host, default port dropped) without their fragment. Anything unparseable
/// is keyed by its trimmed text.
pub fn cache_key(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => trimmed.to_string(),
    }
}
