//! DragonflyDB/Redis preference backend
//!
//! Uses the redis crate which is compatible with DragonflyDB. The connection
//! is opened lazily on first use and shared afterwards.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{PreferenceStore, StorageError, StorageResult};

/// Preferences shared through a Redis-compatible server
pub struct RedisPreferenceStore {
    connection: Arc<RwLock<Option<ConnectionManager>>>,
    url: String,
    /// Expiry applied on every save, `None` keeps keys forever
    ttl_secs: Option<u64>,
}

impl RedisPreferenceStore {
    pub fn new(url: &str) -> Self {
        RedisPreferenceStore {
            connection: Arc::new(RwLock::new(None)),
            url: url.to_string(),
            ttl_secs: None,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_connection(&self) -> StorageResult<ConnectionManager> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        {
            let mut conn = self.connection.write().await;
            *conn = Some(manager.clone());
        }

        info!("🐉 [Preferences] Connected to {}", self.url);
        Ok(manager)
    }

    /// SET carrying the configured expiry
    fn save_command(&self, key: &str, value: &str) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = self.ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        cmd
    }
}

#[async_trait]
impl PreferenceStore for RedisPreferenceStore {
    async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut conn = self.get_connection().await?;
        let result: redis::RedisResult<()> = self.save_command(key, value).query_async(&mut conn).await;
        result.map_err(|e| StorageError::OperationFailed(e.to_string()))
    }

    async fn load(&self, key: &str) -> StorageResult<String> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StorageError::OperationFailed(e.to_string()))?;

        value.ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StorageError::OperationFailed(e.to_string()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.get_connection().await?;
        conn.exists(key)
            .await
            .map_err(|e| StorageError::OperationFailed(e.to_string()))
    }
}
