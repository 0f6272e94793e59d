use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::browser::driver::BrowserDriver;
use crate::browser::fingerprint::EvasionProfileProvider;
use crate::browser::webdriver::WebDriverBrowser;
use crate::cli::config::CrawlerConfig;
use crate::crawler::control::TaskControl;
use crate::crawler::orchestrator::{CrawlEnvironment, SmartCrawler};
use crate::crawler::robots::RobotsCache;
use crate::crawler::scheduler::CrawlScheduler;
use crate::crawler::task::{CrawlTask, TaskReport, TaskSettings, TaskStatus};
use crate::error::CrawlError;
use crate::extract::{ContentExtractor, ContentThresholds, StructureAnalyzer};
use crate::progress::{ProgressChannel, ProgressReceiver};
use crate::proxy::{ProxyPool, ProxyStatus};
use crate::storage::{self, StatusStore, TaskRecord};
use crate::utils::{FetchMetrics, Metrics};

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusView {
    pub status: TaskStatus,
    pub progress: u8,
    pub error_count: usize,
}

impl From<&TaskRecord> for TaskStatusView {
    fn from(record: &TaskRecord) -> Self {
        Self {
            status: record.status,
            progress: record.progress,
            error_count: record.error_count,
        }
    }
}

/// A running task keeps its crawler; a finished one only its report
struct TaskHandle {
    crawler: Option<Arc<SmartCrawler>>,
    report: watch::Receiver<Option<Arc<TaskReport>>>,
}

type TaskTable = Arc<RwLock<HashMap<String, TaskHandle>>>;

/// Entry point for running crawl tasks over one shared scheduler, proxy pool
/// and browser
pub struct CrawlerController {
    config: CrawlerConfig,
    env: Arc<CrawlEnvironment>,
    tasks: TaskTable,
}

impl CrawlerController {
    /// Create a controller with the WebDriver browser and the configured status store
    pub async fn new(config: CrawlerConfig) -> Result<Self> {
        let browser = Arc::new(WebDriverBrowser::new(
            config.browser.clone(),
            config.crawler.fetch_timeout(),
        ));
        let store = storage::create(&config.storage)
            .await
            .context("Failed to initialise status store")?;

        Self::with_components(config, browser, store)
    }

    /// Create a controller around explicit collaborators
    pub fn with_components(
        config: CrawlerConfig,
        browser: Arc<dyn BrowserDriver>,
        store: Arc<dyn StatusStore>,
    ) -> Result<Self> {
        config.validate()?;
        let settings = config.crawler.clone();

        let analyzer = StructureAnalyzer::new().context("Failed to build structure analyzer")?;
        let extractor = ContentExtractor::new(ContentThresholds {
            min_text_length: settings.min_text_length,
            min_image_width: settings.min_image_width,
            min_image_height: settings.min_image_height,
        })
        .context("Failed to build content extractor")?;

        let proxies = ProxyPool::new(&config.proxy.proxy_list);
        info!(
            "Controller ready: max {} concurrent operations, {} proxies",
            settings.max_concurrent,
            proxies.healthy_count()
        );

        let env = CrawlEnvironment {
            wait_condition: config.browser.wait_condition,
            scheduler: CrawlScheduler::new(settings.max_concurrent),
            browser,
            proxies: Arc::new(proxies),
            profiles: Arc::new(EvasionProfileProvider::new(
                config.browser.fingerprints.clone(),
                config.browser.viewport,
            )),
            progress: Arc::new(ProgressChannel::new(config.progress.channel_capacity)),
            store,
            robots: Arc::new(RobotsCache::new(
                settings.user_agent_token.clone(),
                settings.fetch_timeout(),
            )),
            metrics: FetchMetrics::new(settings.slow_request_threshold()),
            analyzer,
            extractor,
            settings,
        };

        Ok(Self {
            config,
            env: Arc::new(env),
            tasks: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Validate and start a task; returns its id
    pub async fn create_task(
        &self,
        urls: &[String],
        depth: u32,
        settings: TaskSettings,
    ) -> Result<String, CrawlError> {
        if urls.is_empty() {
            return Err(CrawlError::InvalidRequest("at least one URL is required".to_string()));
        }
        if depth > self.config.crawler.max_depth {
            return Err(CrawlError::InvalidRequest(format!(
                "depth {} exceeds the maximum of {}",
                depth, self.config.crawler.max_depth
            )));
        }
        if !settings.delay_secs.is_finite() || settings.delay_secs < 0.0 {
            return Err(CrawlError::InvalidRequest(format!(
                "delay must be a non-negative number of seconds, got {}",
                settings.delay_secs
            )));
        }

        let seeds = urls
            .iter()
            .map(|raw| parse_seed(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let task = CrawlTask::new(seeds, depth, settings);
        let task_id = task.id.clone();
        if let Err(e) = self.env.store.save(&TaskRecord::pending(&task)).await {
            warn!("Failed to store status of task {}: {:#}", task_id, e);
        }

        let crawler = Arc::new(SmartCrawler::new(task, self.env.clone(), TaskControl::new()));
        let (done, report) = watch::channel(None);
        write_tasks(&self.tasks).insert(
            task_id.clone(),
            TaskHandle {
                crawler: Some(crawler.clone()),
                report,
            },
        );

        info!("Created task {} for {} seed(s)", task_id, urls.len());
        let tasks = self.tasks.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let report = crawler.run().await;
            // Release the crawler's frontier and buffers before publishing
            if let Some(handle) = write_tasks(&tasks).get_mut(&id) {
                handle.crawler = None;
            }
            done.send_replace(Some(Arc::new(report)));
        });

        Ok(task_id)
    }

    /// Last known status, from the status store
    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskStatusView>, CrawlError> {
        let record = self
            .env
            .store
            .load(task_id)
            .await
            .map_err(|e| CrawlError::Storage(format!("{:#}", e)))?;
        Ok(record.as_ref().map(TaskStatusView::from))
    }

    /// All tasks known to the status store
    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, CrawlError> {
        self.env
            .store
            .list()
            .await
            .map_err(|e| CrawlError::Storage(format!("{:#}", e)))
    }

    /// Progress events of one task from now on
    pub fn subscribe(&self, task_id: &str) -> ProgressReceiver {
        self.env.progress.subscribe(task_id)
    }

    /// Progress events of every task from now on
    pub fn subscribe_all(&self) -> ProgressReceiver {
        self.env.progress.subscribe_all()
    }

    /// Cancelling a finished task is a no-op
    pub fn cancel(&self, task_id: &str) -> Result<(), CrawlError> {
        if let Some(crawler) = self.crawler(task_id)? {
            crawler.cancel();
        }
        Ok(())
    }

    /// Returns false once the task has finished or was cancelled
    pub async fn pause(&self, task_id: &str) -> Result<bool, CrawlError> {
        match self.crawler(task_id)? {
            Some(crawler) => Ok(crawler.pause().await),
            None => Ok(false),
        }
    }

    pub async fn resume(&self, task_id: &str) -> Result<bool, CrawlError> {
        match self.crawler(task_id)? {
            Some(crawler) => Ok(crawler.resume().await),
            None => Ok(false),
        }
    }

    /// Wait for a task started by this controller to settle
    pub async fn wait(&self, task_id: &str) -> Result<Arc<TaskReport>, CrawlError> {
        let mut report = read_tasks(&self.tasks)
            .get(task_id)
            .map(|handle| handle.report.clone())
            .ok_or_else(|| unknown_task(task_id))?;

        let finished = report
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CrawlError::Cancelled)?;
        finished.clone().ok_or(CrawlError::Cancelled)
    }

    pub fn scheduler(&self) -> &CrawlScheduler {
        &self.env.scheduler
    }

    pub async fn metrics(&self) -> Metrics {
        self.env.metrics.get_metrics().await
    }

    pub fn proxy_statuses(&self) -> Vec<ProxyStatus> {
        self.env.proxies.statuses()
    }

    /// `None` once the task has finished
    fn crawler(&self, task_id: &str) -> Result<Option<Arc<SmartCrawler>>, CrawlError> {
        read_tasks(&self.tasks)
            .get(task_id)
            .map(|handle| handle.crawler.clone())
            .ok_or_else(|| unknown_task(task_id))
    }

    /// Whether a task of this controller is still running
    pub fn is_running(&self, task_id: &str) -> bool {
        matches!(self.crawler(task_id), Ok(Some(_)))
    }
}

fn read_tasks(tasks: &TaskTable) -> RwLockReadGuard<'_, HashMap<String, TaskHandle>> {
    tasks.read().unwrap_or_else(|e| e.into_inner())
}

fn write_tasks(tasks: &TaskTable) -> RwLockWriteGuard<'_, HashMap<String, TaskHandle>> {
    tasks.write().unwrap_or_else(|e| e.into_inner())
}

fn unknown_task(task_id: &str) -> CrawlError {
    CrawlError::InvalidRequest(format!("unknown task {}", task_id))
}

fn parse_seed(raw: &str) -> Result<Url, CrawlError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CrawlError::InvalidRequest(format!("invalid URL {:?}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(CrawlError::InvalidRequest(format!(
            "unsupported scheme {:?} in {}",
            scheme, raw
        ))),
    }
}
