//! SQLite-backed durable store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::store::{KeyValueStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite key-value store (one `kv_store` table).
///
/// The connection pool is opened lazily on first use, so constructing a store
/// never touches the filesystem.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    location: Location,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    /// Store backed by the database file at `path` (created if missing).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            pool: Arc::new(Mutex::new(None)),
        }
    }

    /// Store backed by the default path under the OS data directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::open(default_db_path()?))
    }

    /// Private in-memory database. Contents vanish when the store is dropped.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Close the pool. The next call reopens it.
    pub async fn close(&self) {
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
        }
    }

    async fn get_pool(&self) -> anyhow::Result<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self.connect().await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn connect(&self) -> anyhow::Result<SqlitePool> {
        let pool = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create store directory at {parent:?}"))?;
                }

                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .busy_timeout(Duration::from_secs(5));

                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .with_context(|| format!("failed to open SQLite store at {path:?}"))?
            }
            // Every in-memory connection is its own database: pin a single one.
            Location::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::new().in_memory(true))
                .await
                .context("failed to open in-memory SQLite store")?,
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv_store table")?;

        tracing::debug!(location = ?self.location, "sqlite store opened");
        Ok(pool)
    }

    async fn try_get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let pool = self.get_pool().await?;
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .with_context(|| format!("failed to read key {key:?}"))?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn try_set_many(&self, entries: &[(String, String)]) -> anyhow::Result<()> {
        let pool = self.get_pool().await?;
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value)
                VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write key {key:?}"))?;
        }

        tx.commit().await.context("failed to commit write")?;
        Ok(())
    }

    async fn try_remove_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        let pool = self.get_pool().await?;
        let mut tx = pool.begin().await.context("failed to begin transaction")?;

        for key in keys {
            sqlx::query("DELETE FROM kv_store WHERE key = ?1")
                .bind(*key)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to delete key {key:?}"))?;
        }

        tx.commit().await.context("failed to commit delete")?;
        Ok(())
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.try_get(key).await.map_err(backend)
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.try_set_many(&[(key.to_string(), value)])
            .await
            .map_err(backend)
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.try_remove_many(&[key]).await.map_err(backend)
    }

    /// Atomic across keys.
    async fn multi_set(&self, entries: Vec<(String, String)>) -> StoreResult<()> {
        self.try_set_many(&entries).await.map_err(backend)
    }

    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()> {
        self.try_remove_many(keys).await.map_err(backend)
    }
}

/// `{data_dir}/tableside/sync.db`, falling back to `~/.local/share`.
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let mut dir = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS data directory - tried data_dir() and home_dir()/.local/share")?;

    dir.push("tableside");
    dir.push("sync.db");
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tableside_core::OperationId;

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir()
            .join("tableside-tests")
            .join(format!("{}.db", OperationId::new()))
    }

    #[tokio::test]
    async fn in_memory_store_supports_basic_operations() {
        let store = SqliteStore::in_memory();
        assert!(store.get("k").await.unwrap().is_none());

        store.set("k", "\"v1\"".to_string()).await.unwrap();
        store.set("k", "\"v2\"".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("\"v2\""));

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_write_and_delete() {
        let store = SqliteStore::in_memory();
        store
            .multi_set(vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])
            .await
            .unwrap();

        let got = store.multi_get(&["a", "b", "c"]).await.unwrap();
        assert_eq!(got[0].1.as_deref(), Some("1"));
        assert_eq!(got[1].1.as_deref(), Some("2"));
        assert!(got[2].1.is_none());

        store.multi_remove(&["a", "b"]).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn values_survive_reopening_the_file() {
        let path = temp_db_path();

        let first = SqliteStore::open(&path);
        first
            .set("sync:pending_operations", "[]".to_string())
            .await
            .unwrap();
        first.close().await;
        drop(first);

        let second = SqliteStore::open(&path);
        assert_eq!(
            second.get("sync:pending_operations").await.unwrap().as_deref(),
            Some("[]")
        );
        second.close().await;

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn default_path_ends_with_app_file() {
        if let Ok(path) = default_db_path() {
            assert!(path.ends_with("tableside/sync.db"));
        }
    }
}
