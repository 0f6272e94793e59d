use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::browser::fingerprint::EvasionProfile;
use crate::extract::{ExtractedContentItem, SiteStructure};
use crate::proxy::ProxyRecord;

/// Per-task options recognised by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskSettings {
    /// Route page fetches through the proxy pool
    pub use_proxy: bool,

    /// Skip child links disallowed by the target's robots.txt
    pub respect_robots: bool,

    /// Delay between fetch attempts, in seconds
    pub delay_secs: f64,

    /// Extra attempts after the first failed fetch
    pub max_retries: u32,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            use_proxy: false,
            respect_robots: true,
            delay_secs: 0.0,
            max_retries: 2,
        }
    }
}

impl TaskSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_secs.max(0.0))
    }
}

/// Lifecycle state of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Cancelled | TaskStatus::Completed | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A crawl job submitted by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    /// Unique identifier of the task
    pub id: String,

    /// Seed URLs, crawled in this order
    pub seeds: Vec<Url>,

    /// Maximum link depth below the seeds
    pub max_depth: u32,

    pub settings: TaskSettings,

    pub created_at: DateTime<Utc>,
}

impl CrawlTask {
    pub fn new(seeds: Vec<Url>, max_depth: u32, settings: TaskSettings) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seeds,
            max_depth,
            settings,
            created_at: Utc::now(),
        }
    }
}

/// One unit of scheduling work: a single fetch attempt for one URL
#[derive(Debug, Clone)]
pub struct CrawlOperation {
    pub url: Url,

    /// Levels of links still allowed below this page
    pub remaining_depth: u32,

    pub task_id: Arc<str>,

    pub profile: Arc<EvasionProfile>,

    pub proxy: Option<Arc<ProxyRecord>>,

    /// Further attempts allowed if this one fails
    pub retries_left: u32,

    /// 1 for the first attempt
    pub attempt: u32,
}

impl CrawlOperation {
    /// Operation for a link discovered on this page, one level deeper.
    /// Returns `None` at depth 0: such pages never spawn children.
    pub fn child(
        &self,
        url: Url,
        profile: Arc<EvasionProfile>,
        proxy: Option<Arc<ProxyRecord>>,
        max_retries: u32,
    ) -> Option<Self> {
        let remaining_depth = self.remaining_depth.checked_sub(1)?;
        Some(Self {
            url,
            remaining_depth,
            task_id: self.task_id.clone(),
            profile,
            proxy,
            retries_left: max_retries,
            attempt: 1,
        })
    }

    /// A fresh operation for the same URL with one less retry.
    /// Depth is unchanged: retries consume no depth budget.
    pub fn retry(&self, proxy: Option<Arc<ProxyRecord>>) -> Option<Self> {
        let retries_left = self.retries_left.checked_sub(1)?;
        Some(Self {
            url: self.url.clone(),
            remaining_depth: self.remaining_depth,
            task_id: self.task_id.clone(),
            profile: self.profile.clone(),
            proxy,
            retries_left,
            attempt: self.attempt + 1,
        })
    }
}

/// An error recorded against one URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub url: String,
    pub message: String,
}

/// Counters owned by one task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_crawled: usize,
    pub elements_found: usize,
    pub errors: Vec<ErrorRecord>,
}

impl CrawlStats {
    pub fn record_error(&mut self, url: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            url: url.into(),
            message: message.into(),
        });
    }
}

/// Final outcome of a task, returned when every operation has settled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub stats: CrawlStats,
    pub content: Vec<ExtractedContentItem>,
    pub site_structure: Option<SiteStructure>,
    /// Unique URLs visited, in first-visit order
    pub visited: Vec<String>,
    /// Every submission made to the scheduler, retries included
    pub operations_submitted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
