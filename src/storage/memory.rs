use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{StatusStore, TaskRecord};

/// Process-local status store; records live as long as the process
#[derive(Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn save(&self, record: &TaskRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.records.read().await.get(task_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }
}
