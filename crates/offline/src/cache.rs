//! TTL cache of remote resource collections.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tableside_core::{Clock, ResourceKey, SystemClock};

use crate::store::{KeyValueStore, StoreError, read_json, write_json};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Stored form of a cached resource: `{"data": …, "timestamp": <epoch ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

/// Resource cache over a [`KeyValueStore`].
///
/// Expiry is strict: an entry older than its max age is deleted on read.
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Store `data` stamped with the current time.
    pub async fn save_to_cache(&self, key: &ResourceKey, data: &Value) -> CacheResult<()> {
        let entry = CacheEntry {
            data: data.clone(),
            timestamp: self.clock.now(),
        };
        write_json(self.store.as_ref(), &key.cache_key(), &entry).await?;
        Ok(())
    }

    /// Data for `key` if it is no older than `max_age`; expired entries are
    /// removed.
    pub async fn get_from_cache(
        &self,
        key: &ResourceKey,
        max_age: Duration,
    ) -> CacheResult<Option<Value>> {
        let Some(entry) = self.entry(key).await? else {
            return Ok(None);
        };

        if entry.age_at(self.clock.now()) <= max_age {
            return Ok(Some(entry.data));
        }

        tracing::debug!(resource = %key, "cache entry expired");
        self.invalidate(key).await?;
        Ok(None)
    }

    /// [`get_from_cache`](Self::get_from_cache) with the resource's own max age.
    pub async fn get(&self, key: &ResourceKey) -> CacheResult<Option<Value>> {
        self.get_from_cache(key, key.max_age()).await
    }

    /// Data for `key` regardless of age.
    pub async fn get_any(&self, key: &ResourceKey) -> CacheResult<Option<Value>> {
        Ok(self.entry(key).await?.map(|entry| entry.data))
    }

    /// Raw entry including its timestamp. Undecodable entries read as absent.
    pub async fn entry(&self, key: &ResourceKey) -> CacheResult<Option<CacheEntry>> {
        match read_json::<CacheEntry, _>(self.store.as_ref(), &key.cache_key()).await {
            Ok(entry) => Ok(entry),
            Err(StoreError::Serialization { source, .. }) => {
                tracing::warn!(resource = %key, error = %source, "ignoring corrupt cache entry");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn invalidate(&self, key: &ResourceKey) -> CacheResult<()> {
        self.store.remove(&key.cache_key()).await?;
        Ok(())
    }
}
