use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{prune_cutoff, CacheError, CacheRecord, CacheStore};

/// Process-local cache. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    records: Arc<RwLock<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let records = self.records.read().await;
        Ok(records.get(key).map(|(value, fetched_at)| CacheRecord {
            key: key.to_string(),
            value: value.clone(),
            fetched_at: *fetched_at,
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        self.records
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), fetched_at));
        Ok(())
    }

    async fn prune(&self, older_than: Duration) -> Result<u64, CacheError> {
        let cutoff = prune_cutoff(older_than)?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, (_, fetched_at)| *fetched_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
