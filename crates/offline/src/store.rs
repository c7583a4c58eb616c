//! Durable key-value store abstraction.
//!
//! Values are JSON documents serialized to strings. The sync core only needs
//! single-key atomicity; batch operations are a convenience and may apply
//! partially (readers treat missing keys as unset).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing storage failed (I/O, SQLite, lock poisoning).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be encoded/decoded.
    #[error("serialization error for key {key:?}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    async fn multi_get(&self, keys: &[&str]) -> StoreResult<Vec<(String, Option<String>)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.to_string(), self.get(key).await?));
        }
        Ok(out)
    }

    /// Write several keys. Not atomic across keys unless the backend says so.
    async fn multi_set(&self, entries: Vec<(String, String)>) -> StoreResult<()> {
        for (key, value) in entries {
            self.set(&key, value).await?;
        }
        Ok(())
    }

    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key).await
    }

    async fn multi_get(&self, keys: &[&str]) -> StoreResult<Vec<(String, Option<String>)>> {
        (**self).multi_get(keys).await
    }

    async fn multi_set(&self, entries: Vec<(String, String)>) -> StoreResult<()> {
        (**self).multi_set(entries).await
    }

    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()> {
        (**self).multi_remove(keys).await
    }
}

/// Read and decode a JSON value.
pub async fn read_json<T, S>(store: &S, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn write_json<T, S>(store: &S, key: &str, value: &T) -> StoreResult<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw).await
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Keys currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.inner.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))?;
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn set_get_remove() {
        let store = InMemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.set("a", "1".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_operations_cover_every_key() {
        let store = InMemoryStore::new();
        store
            .multi_set(vec![
                ("auth:token".to_string(), "\"t\"".to_string()),
                ("auth:user".to_string(), "\"u\"".to_string()),
            ])
            .await
            .unwrap();

        let got = store.multi_get(&["auth:token", "auth:user", "auth:role"]).await.unwrap();
        assert_eq!(got[0].1.as_deref(), Some("\"t\""));
        assert_eq!(got[1].1.as_deref(), Some("\"u\""));
        assert_eq!(got[2], ("auth:role".to_string(), None));

        store.multi_remove(&["auth:token", "auth:user"]).await.unwrap();
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn json_helpers_round_trip_and_report_corruption() {
        let store = InMemoryStore::new();
        write_json(&store, "doc", &json!({"n": 1})).await.unwrap();
        let doc: Option<Value> = read_json(&store, "doc").await.unwrap();
        assert_eq!(doc, Some(json!({"n": 1})));

        store.set("doc", "{not json".to_string()).await.unwrap();
        let err = read_json::<Value, _>(&store, "doc").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { ref key, .. } if key == "doc"));
    }
}
