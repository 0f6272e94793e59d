pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cli::config::StorageSettings;
use crate::crawler::task::{CrawlStats, CrawlTask, TaskStatus};

pub use self::memory::MemoryStatusStore;
pub use self::redis::RedisStatusStore;

/// Last known state of a task, as seen by late observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub seeds: Vec<String>,
    pub max_depth: u32,
    pub status: TaskStatus,
    pub progress: u8,
    pub pages_crawled: usize,
    pub elements_found: usize,
    pub error_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A pending record for a freshly created task
    pub fn pending(task: &CrawlTask) -> Self {
        Self {
            task_id: task.id.clone(),
            seeds: task.seeds.iter().map(|url| url.to_string()).collect(),
            max_depth: task.max_depth,
            status: TaskStatus::Pending,
            progress: 0,
            pages_crawled: 0,
            elements_found: 0,
            error_count: 0,
            created_at: task.created_at,
            updated_at: task.created_at,
        }
    }

    /// Copy of this record reflecting the given state
    pub fn updated(&self, status: TaskStatus, progress: u8, stats: &CrawlStats) -> Self {
        Self {
            status,
            progress,
            pages_crawled: stats.pages_crawled,
            elements_found: stats.elements_found,
            error_count: stats.errors.len(),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Persistence collaborator for task status
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert or replace the record for `record.task_id`
    async fn save(&self, record: &TaskRecord) -> Result<()>;

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// All known records, oldest first
    async fn list(&self) -> Result<Vec<TaskRecord>>;
}

/// Build the store selected by `settings.backend`
pub async fn create(settings: &StorageSettings) -> Result<Arc<dyn StatusStore>> {
    match settings.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStatusStore::new())),
        "redis" => Ok(Arc::new(RedisStatusStore::new(settings).await?)),
        other => anyhow::bail!("Unsupported status store backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::TaskSettings;
    use url::Url;

    #[test]
    fn updated_record_tracks_stats() {
        let task = CrawlTask::new(
            vec![Url::parse("http://a.test").unwrap()],
            1,
            TaskSettings::default(),
        );
        let pending = TaskRecord::pending(&task);
        assert_eq!(pending.seeds, vec!["http://a.test/"]);

        let mut stats = CrawlStats {
            pages_crawled: 3,
            elements_found: 7,
            errors: Vec::new(),
        };
        stats.record_error("http://b.test/", "timed out");

        let record = pending.updated(TaskStatus::Running, 40, &stats);
        assert_eq!(record.task_id, task.id);
        assert_eq!(record.progress, 40);
        assert_eq!(record.pages_crawled, 3);
        assert_eq!(record.error_count, 1);
        assert!(record.updated_at >= pending.updated_at);
    }

    #[tokio::test]
    async fn rejects_unknown_backend() {
        let settings = StorageSettings {
            backend: "mongodb".to_string(),
            ..StorageSettings::default()
        };
        assert!(create(&settings).await.is_err());
    }
}
