use anyhow::{Context, Result};
use async_trait::async_trait;
use ::redis::{aio::MultiplexedConnection, Client};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{StatusStore, TaskRecord};
use crate::cli::config::StorageSettings;

/// Status store backed by Redis string keys holding JSON records
pub struct RedisStatusStore {
    /// Key prefix, e.g. `crawler` for `crawler:task:<id>`
    prefix: String,

    /// Record TTL in seconds
    record_ttl: u64,

    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisStatusStore {
    pub async fn new(settings: &StorageSettings) -> Result<Self> {
        let client = Client::open(settings.redis_url.clone())
            .context(format!("Failed to connect to Redis at {}", settings.redis_url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to get Redis connection")?;

        Ok(Self {
            prefix: settings.key_prefix.clone(),
            record_ttl: settings.record_ttl_secs,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn task_key(&self, task_id: &str) -> String {
        task_key(&self.prefix, task_id)
    }
}

fn task_key(prefix: &str, task_id: &str) -> String {
    format!("{}:task:{}", prefix, task_id)
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn save(&self, record: &TaskRecord) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize task record")?;
        let key = self.task_key(&record.task_id);

        let mut conn = self.conn.lock().await;
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(&key).arg(&json);
        if self.record_ttl > 0 {
            cmd.arg("EX").arg(self.record_ttl);
        }
        cmd.query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to store task record in Redis")?;

        debug!("Stored status for task {}: {}", record.task_id, record.status);
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let mut conn = self.conn.lock().await;
        let json: Option<String> = ::redis::cmd("GET")
            .arg(self.task_key(task_id))
            .query_async(&mut *conn)
            .await
            .context("Failed to read task record from Redis")?;

        json.map(|json| serde_json::from_str(&json).context("Failed to deserialize task record"))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut conn = self.conn.lock().await;
        let keys: Vec<String> = ::redis::cmd("KEYS")
            .arg(task_key(&self.prefix, "*"))
            .query_async(&mut *conn)
            .await
            .context("Failed to list task records")?;

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = ::redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut *conn)
            .await
            .context("Failed to read task records")?;

        // Keys may expire between KEYS and MGET
        let mut records = values
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).context("Failed to deserialize task record"))
            .collect::<Result<Vec<TaskRecord>>>()?;
        records.sort_by_key(|record| record.created_at);

        Ok(records)
    }
}
