//! One task's crawl, end to end.
//!
//! Seeds are fetched first and their structure decides the crawl strategy.
//! Every page after that is one [`CrawlOperation`] submitted to the shared
//! [`CrawlScheduler`]. A page's children are visited only after its own
//! operation has returned its slot, so recursion composes futures instead of
//! nesting waits inside held slots.

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::driver::{BrowserDriver, ContextOptions, WaitCondition};
use crate::browser::fingerprint::EvasionProfileProvider;
use crate::cli::config::CrawlerSettings;
use crate::crawler::control::{ControlState, TaskControl};
use crate::crawler::frontier::Frontier;
use crate::crawler::robots::RobotsCache;
use crate::crawler::scheduler::CrawlScheduler;
use crate::crawler::strategy::CrawlStrategy;
use crate::crawler::task::{CrawlOperation, CrawlStats, CrawlTask, TaskReport, TaskStatus};
use crate::error::{CrawlError, FetchError};
use crate::extract::{ContentExtractor, ExtractedContentItem, SiteStructure, StructureAnalyzer};
use crate::progress::ProgressChannel;
use crate::proxy::ProxyPool;
use crate::storage::{StatusStore, TaskRecord};
use crate::utils::FetchMetrics;

/// Process-wide collaborators shared by every task of a controller
pub struct CrawlEnvironment {
    pub settings: CrawlerSettings,
    pub wait_condition: WaitCondition,
    pub scheduler: CrawlScheduler,
    pub browser: Arc<dyn BrowserDriver>,
    pub proxies: Arc<ProxyPool>,
    pub profiles: Arc<EvasionProfileProvider>,
    pub progress: Arc<ProgressChannel>,
    pub store: Arc<dyn StatusStore>,
    pub robots: Arc<RobotsCache>,
    pub metrics: FetchMetrics,
    pub analyzer: StructureAnalyzer,
    pub extractor: ContentExtractor,
}

/// What one successful fetch yields
#[derive(Debug)]
struct FetchedPage {
    url: Url,
    structure: SiteStructure,
    content: Vec<ExtractedContentItem>,
}

/// One fetch attempt, run inside a scheduler slot
async fn fetch_page(env: Arc<CrawlEnvironment>, op: CrawlOperation) -> Result<FetchedPage, FetchError> {
    let timer = env.metrics.start_timer();
    let limit = env.settings.fetch_timeout();
    let options = ContextOptions {
        profile: op.profile.clone(),
        proxy: op.proxy.clone(),
    };
    debug!(url = %op.url, attempt = op.attempt, profile = %op.profile.name, "Fetching page");

    let navigation = async {
        let mut session = env.browser.open(&options).await?;
        let snapshot = session.navigate(&op.url, env.wait_condition).await;
        if let Err(e) = session.close().await {
            debug!("Failed to close browser context for {}: {}", op.url, e);
        }
        snapshot
    };

    let result = match tokio::time::timeout(limit, navigation).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: op.url.to_string(),
            after: limit,
        }),
    };
    env.metrics
        .record_fetch(op.url.as_str(), result.is_ok(), timer.elapsed())
        .await;

    let snapshot = result?;
    Ok(FetchedPage {
        url: snapshot.url.clone(),
        structure: env.analyzer.analyze(&snapshot),
        content: env.extractor.extract(&snapshot),
    })
}

struct TaskState {
    status: TaskStatus,
    progress: u8,
    stats: CrawlStats,
    content: Vec<ExtractedContentItem>,
    frontier: Frontier,
    /// Distinct URLs handed an operation
    scheduled: usize,
    /// Of those, how many reached a final outcome
    settled: usize,
    /// Scheduler submissions, retries included
    submitted: usize,
    site: Option<SiteStructure>,
    strategy: Arc<CrawlStrategy>,
    seeds_fetched: usize,
    record: TaskRecord,
    record_seq: u64,
}

impl TaskState {
    /// Settled share of scheduled work, never moving backwards, below 100
    fn advance_progress(&mut self) -> u8 {
        if self.scheduled > 0 {
            let estimate = (self.settled * 100 / self.scheduled).min(99) as u8;
            self.progress = self.progress.max(estimate);
        }
        self.progress
    }

    /// Snapshot for the status store, tagged with a write sequence
    fn next_record(&mut self) -> (u64, TaskRecord) {
        self.record = self.record.updated(self.status, self.progress, &self.stats);
        self.record_seq += 1;
        (self.record_seq, self.record.clone())
    }
}

/// Orchestrates one crawl task over the shared environment
pub struct SmartCrawler {
    task: CrawlTask,
    task_id: Arc<str>,
    env: Arc<CrawlEnvironment>,
    control: TaskControl,
    state: Mutex<TaskState>,
    /// Highest record sequence written to the store
    persisted: Mutex<u64>,
}

impl SmartCrawler {
    pub fn new(task: CrawlTask, env: Arc<CrawlEnvironment>, control: TaskControl) -> Self {
        let strategy = CrawlStrategy::derive(
            &task.seeds,
            &SiteStructure::default(),
            &env.settings,
            &task.settings,
            &env.profiles,
            None,
        );
        let state = TaskState {
            status: TaskStatus::Pending,
            progress: 0,
            stats: CrawlStats::default(),
            content: Vec::new(),
            frontier: Frontier::new(&env.settings),
            scheduled: 0,
            settled: 0,
            submitted: 0,
            site: None,
            strategy: Arc::new(strategy),
            seeds_fetched: 0,
            record: TaskRecord::pending(&task),
            record_seq: 0,
        };

        env.progress.open(&task.id);
        Self {
            task_id: Arc::from(task.id.as_str()),
            task,
            env,
            control,
            state: Mutex::new(state),
            persisted: Mutex::new(0),
        }
    }

    pub fn task(&self) -> &CrawlTask {
        &self.task
    }

    pub fn control(&self) -> &TaskControl {
        &self.control
    }

    pub async fn status(&self) -> TaskStatus {
        self.state.lock().await.status
    }

    /// Crawl until every operation has settled and return the final report
    pub async fn run(self: Arc<Self>) -> TaskReport {
        let started_at = Utc::now();
        info!(
            "Starting task {} with {} seed(s), depth {}",
            self.task.id,
            self.task.seeds.len(),
            self.task.max_depth
        );
        self.transition(TaskStatus::Running, "crawl started").await;

        // Phase 1: seeds, submitted in order and fetched concurrently
        let seeds = self.seed_operations().await;
        let pages = join_all(seeds.into_iter().map(|op| {
            let crawler = self.clone();
            async move {
                let page = crawler.fetch_with_retries(op.clone()).await?;
                Some((op, page))
            }
        }))
        .await;
        let pages: Vec<_> = pages.into_iter().flatten().collect();

        // Phase 2: guided by the seeds' aggregated structure
        if !pages.is_empty() {
            self.derive_strategy(&pages).await;

            let visits = pages.into_iter().map(|(op, page)| {
                let crawler = self.clone();
                async move {
                    let children = crawler.expand(&op, &page).await;
                    crawler.record_page(&page).await;
                    join_all(children.into_iter().map(|child| crawler.clone().visit(child))).await;
                }
            });
            join_all(visits).await;
        }

        self.finish(started_at).await
    }

    /// Cooperatively pause; returns false once the task can no longer pause
    pub async fn pause(&self) -> bool {
        if !self.control.pause() {
            return false;
        }
        self.set_status_unless_terminal(TaskStatus::Running, TaskStatus::Paused, "paused")
            .await
    }

    pub async fn resume(&self) -> bool {
        if !self.control.resume() {
            return false;
        }
        self.set_status_unless_terminal(TaskStatus::Paused, TaskStatus::Running, "resumed")
            .await
    }

    /// Stop scheduling new work; in-flight fetches finish on their own
    pub fn cancel(&self) {
        info!("Cancelling task {}", self.task.id);
        self.control.cancel();
    }

    async fn set_status_unless_terminal(
        &self,
        from: TaskStatus,
        to: TaskStatus,
        message: &str,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.status.is_terminal() {
            return false;
        }
        if state.status != from {
            return true;
        }
        state.status = to;
        self.env
            .progress
            .publish(&self.task.id, state.progress, to, message);
        let record = state.next_record();
        drop(state);
        self.persist(record).await;
        true
    }

    async fn transition(&self, status: TaskStatus, message: &str) {
        let mut state = self.state.lock().await;
        state.status = status;
        self.env
            .progress
            .publish(&self.task.id, state.progress, status, message);
        let record = state.next_record();
        drop(state);
        self.persist(record).await;
    }

    /// Seeds are claimed in order; duplicates collapse and filters do not apply
    async fn seed_operations(&self) -> Vec<CrawlOperation> {
        let mut state = self.state.lock().await;
        let strategy = state.strategy.clone();
        let mut seeds = Vec::new();

        for url in &self.task.seeds {
            if !state.frontier.claim(url) {
                continue;
            }
            state.scheduled += 1;
            seeds.push(CrawlOperation {
                url: url.clone(),
                remaining_depth: self.task.max_depth,
                task_id: self.task_id.clone(),
                profile: strategy.profile(&self.env.profiles),
                proxy: strategy.proxy(&self.env.proxies),
                retries_left: self.task.settings.max_retries,
                attempt: 1,
            });
        }
        seeds
    }

    async fn derive_strategy(&self, pages: &[(CrawlOperation, FetchedPage)]) {
        let mut site = SiteStructure::default();
        for (_, page) in pages {
            site.merge(&page.structure);
        }
        let fetched: Vec<Url> = pages.iter().map(|(op, _)| op.url.clone()).collect();

        let mut state = self.state.lock().await;
        state.seeds_fetched = pages.len();
        let strategy = CrawlStrategy::derive(
            &fetched,
            &site,
            &self.env.settings,
            &self.task.settings,
            &self.env.profiles,
            Some(state.strategy.task_profile().clone()),
        );
        state.strategy = Arc::new(strategy);
        state.site = Some(site);
    }

    /// Fetch a claimed page and expand its children once it has settled
    fn visit(self: Arc<Self>, op: CrawlOperation) -> BoxFuture<'static, ()> {
        async move {
            let Some(page) = self.clone().fetch_with_retries(op.clone()).await else {
                return;
            };
            // Claim children first so progress accounts for them
            let children = self.expand(&op, &page).await;
            self.record_page(&page).await;

            join_all(children.into_iter().map(|child| self.clone().visit(child))).await;
        }
        .boxed()
    }

    /// Submit attempts until one succeeds or the retry budget is spent.
    /// Exactly one error is recorded for a URL that never succeeds.
    async fn fetch_with_retries(self: Arc<Self>, mut op: CrawlOperation) -> Option<FetchedPage> {
        loop {
            if self.control.wait_until_runnable().await.is_err() {
                debug!("Task {} cancelled before fetching {}", self.task.id, op.url);
                self.settle_without_page().await;
                return None;
            }

            let failure = match self.attempt(op.clone()).await {
                Ok(Some(page)) => return Some(page),
                // Paused or cancelled before the fetch started
                Ok(None) => continue,
                Err(e) => e,
            };

            if let Some(proxy) = &op.proxy {
                self.env.proxies.mark_unhealthy(proxy);
            }

            let strategy = self.state.lock().await.strategy.clone();
            let next = match op.retry(strategy.proxy(&self.env.proxies)) {
                Some(next) if !self.control.is_cancelled() => next,
                _ => {
                    warn!("Giving up on {} after {} attempt(s): {}", op.url, op.attempt, failure);
                    self.record_failure(&op.url, &failure).await;
                    return None;
                }
            };

            let delay = self.retry_delay(&op.url).await;
            debug!(
                "Attempt {} for {} failed ({}), retrying in {}ms",
                op.attempt,
                op.url,
                failure,
                delay.as_millis()
            );
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.control.cancelled() => {}
                }
            }
            if self.control.is_cancelled() {
                self.record_failure(&op.url, &failure).await;
                return None;
            }

            op = next;
        }
    }

    /// One scheduler submission for one fetch attempt.
    ///
    /// `None` means the task was paused or cancelled before the page was
    /// fetched: a queued attempt leaves the queue, an admitted one hands its
    /// slot back unused.
    async fn attempt(&self, op: CrawlOperation) -> Result<Option<FetchedPage>, CrawlError> {
        self.state.lock().await.submitted += 1;

        let env = self.env.clone();
        let control = self.control.clone();
        let admission = self.env.scheduler.submit(op, move |op| async move {
            if control.state() != ControlState::Running {
                return None;
            }
            Some(fetch_page(env, op).await)
        });

        // Dropping the admission removes the queue entry without taking a slot
        let handle = tokio::select! {
            handle = admission => handle?,
            _ = self.control.interrupted() => return Ok(None),
        };

        Ok(handle.await?.transpose()?)
    }

    /// Politeness delay between attempts: the task's delay or the origin's
    /// robots.txt Crawl-delay, whichever is longer
    async fn retry_delay(&self, url: &Url) -> Duration {
        let delay = self.task.settings.delay();
        if !self.task.settings.respect_robots {
            return delay;
        }
        match self.env.robots.rules_for(url).await.crawl_delay {
            Some(crawl_delay) => delay.max(crawl_delay),
            None => delay,
        }
    }

    async fn record_page(&self, page: &FetchedPage) {
        let mut state = self.state.lock().await;
        state.stats.pages_crawled += 1;
        state.stats.elements_found += page.content.len();
        state.content.extend(page.content.iter().cloned());
        state.settled += 1;

        let progress = state.advance_progress();
        self.env.progress.publish(
            &self.task.id,
            progress,
            state.status,
            format!("fetched {} ({} items)", page.url, page.content.len()),
        );
        let record = state.next_record();
        drop(state);
        self.persist(record).await;
    }

    async fn record_failure(&self, url: &Url, failure: &CrawlError) {
        let mut state = self.state.lock().await;
        state.stats.record_error(url.as_str(), failure.to_string());
        state.settled += 1;

        let progress = state.advance_progress();
        self.env.progress.publish(
            &self.task.id,
            progress,
            state.status,
            format!("failed {}: {}", url, failure),
        );
        let record = state.next_record();
        drop(state);
        self.persist(record).await;
    }

    async fn settle_without_page(&self) {
        let mut state = self.state.lock().await;
        state.settled += 1;
        state.advance_progress();
    }

    /// Child operations for a fetched page, claimed in the frontier.
    /// Nothing is produced at depth 0 or once the task is cancelled.
    async fn expand(&self, op: &CrawlOperation, page: &FetchedPage) -> Vec<CrawlOperation> {
        if op.remaining_depth == 0 || self.control.is_cancelled() {
            return Vec::new();
        }

        let (strategy, candidates) = {
            let state = self.state.lock().await;
            let strategy = state.strategy.clone();
            let candidates = strategy.select_links(&page.structure.links, &state.frontier);
            (strategy, candidates)
        };

        let mut allowed = Vec::with_capacity(candidates.len());
        for link in candidates {
            if self.task.settings.respect_robots && !self.env.robots.is_allowed(&link).await {
                debug!("robots.txt disallows {}", link);
                continue;
            }
            allowed.push(link);
        }

        let mut state = self.state.lock().await;
        if self.control.is_cancelled() {
            return Vec::new();
        }

        let mut children = Vec::new();
        for link in allowed {
            if !state.frontier.claim(&link) {
                continue;
            }
            let child = op.child(
                link,
                strategy.profile(&self.env.profiles),
                strategy.proxy(&self.env.proxies),
                self.task.settings.max_retries,
            );
            if let Some(child) = child {
                state.scheduled += 1;
                children.push(child);
            }
        }

        if !children.is_empty() {
            debug!("Scheduling {} link(s) found on {}", children.len(), op.url);
        }
        children
    }

    async fn finish(&self, started_at: chrono::DateTime<Utc>) -> TaskReport {
        let mut state = self.state.lock().await;

        let status = if self.control.is_cancelled() {
            TaskStatus::Cancelled
        } else if state.seeds_fetched == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        if status != TaskStatus::Cancelled {
            state.progress = 100;
        }
        state.status = status;

        let message = match status {
            TaskStatus::Failed => {
                error!("Task {} failed: no seed could be fetched", self.task.id);
                "no seed could be fetched".to_string()
            }
            _ => {
                info!(
                    "Task {} {}: {} page(s), {} item(s), {} error(s)",
                    self.task.id,
                    status,
                    state.stats.pages_crawled,
                    state.stats.elements_found,
                    state.stats.errors.len()
                );
                format!("crawl {}", status)
            }
        };
        self.env
            .progress
            .publish(&self.task.id, state.progress, status, message);
        self.env.progress.close(&self.task.id);

        let report = TaskReport {
            task_id: self.task.id.clone(),
            status,
            progress: state.progress,
            stats: state.stats.clone(),
            content: state.content.clone(),
            site_structure: state.site.clone(),
            visited: state.frontier.claimed().to_vec(),
            operations_submitted: state.submitted,
            started_at,
            finished_at: Utc::now(),
        };
        let record = state.next_record();
        drop(state);
        self.persist(record).await;

        report
    }

    /// Write a record unless a newer one already went out
    async fn persist(&self, (seq, record): (u64, TaskRecord)) {
        let mut persisted = self.persisted.lock().await;
        if seq <= *persisted {
            return;
        }
        if let Err(e) = self.env.store.save(&record).await {
            warn!("Failed to store status of task {}: {:#}", self.task.id, e);
            return;
        }
        *persisted = seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{DomSnapshot, MockBrowserDriver, MockPageSession, PageSession};
    use crate::browser::testing::StaticBrowser;
    use crate::cli::config::{default_fingerprints, Viewport};
    use crate::crawler::task::TaskSettings;
    use crate::extract::ContentThresholds;
    use crate::progress::ProgressEvent;
    use crate::storage::MemoryStatusStore;
    use tokio::sync::broadcast::error::TryRecvError;

    const PARAGRAPH: &str = "A paragraph that is long enough to count as real content on a page.";

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn environment(browser: Arc<dyn BrowserDriver>, max_concurrent: usize) -> Arc<CrawlEnvironment> {
        let settings = CrawlerSettings {
            max_concurrent,
            ..CrawlerSettings::default()
        };
        Arc::new(CrawlEnvironment {
            wait_condition: WaitCondition::Load,
            scheduler: CrawlScheduler::new(max_concurrent),
            browser,
            proxies: Arc::new(ProxyPool::default()),
            profiles: Arc::new(EvasionProfileProvider::new(
                default_fingerprints(),
                Viewport {
                    width: 1280,
                    height: 800,
                },
            )),
            progress: Arc::new(ProgressChannel::default()),
            store: Arc::new(MemoryStatusStore::new()),
            robots: Arc::new(RobotsCache::new("adaptive-crawler", settings.fetch_timeout())),
            metrics: FetchMetrics::new(settings.slow_request_threshold()),
            analyzer: StructureAnalyzer::new().unwrap(),
            extractor: ContentExtractor::new(ContentThresholds::default()).unwrap(),
            settings,
        })
    }

    fn settings() -> TaskSettings {
        TaskSettings {
            respect_robots: false,
            ..TaskSettings::default()
        }
    }

    fn crawler(env: &Arc<CrawlEnvironment>, seeds: &[&str], depth: u32, settings: TaskSettings) -> Arc<SmartCrawler> {
        let task = CrawlTask::new(seeds.iter().map(|s| url(s)).collect(), depth, settings);
        Arc::new(SmartCrawler::new(task, env.clone(), TaskControl::new()))
    }

    fn drain(rx: &mut crate::progress::ProgressReceiver) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn three_site_browser() -> StaticBrowser {
        StaticBrowser::new()
            .with_page(
                "http://a.test/",
                format!(
                    r#"<h1>Home</h1><p>{PARAGRAPH}</p><p>{PARAGRAPH}</p>
                       <a href="http://b.test/">b</a><a href="http://c.test/">c</a>"#
                ),
            )
            .with_page("http://b.test/", format!("<p>{PARAGRAPH}</p><a href=\"http://a.test/\">home</a>"))
            .with_page("http://c.test/", format!("<article>{PARAGRAPH}</article>"))
    }

    #[tokio::test]
    async fn crawls_seed_and_children_once() {
        let browser = Arc::new(three_site_browser());
        let env = environment(browser.clone(), 10);
        let crawler = crawler(&env, &["http://a.test"], 1, settings());

        let report = crawler.run().await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.progress, 100);
        assert_eq!(report.stats.pages_crawled, 3);
        assert_eq!(report.stats.elements_found, 4);
        assert!(report.stats.errors.is_empty());
        assert_eq!(report.operations_submitted, 3);
        assert_eq!(
            report.visited,
            vec!["http://a.test", "http://b.test", "http://c.test"]
        );

        let site = report.site_structure.unwrap();
        assert!(!site.login_required);
        assert_eq!(site.links, vec![url("http://b.test/"), url("http://c.test/")]);

        // b.test links back home: already visited, and depth is spent anyway
        assert_eq!(browser.navigations(), 3);
    }

    #[tokio::test]
    async fn depth_zero_fetches_only_the_seed() {
        let browser = Arc::new(three_site_browser());
        let env = environment(browser.clone(), 10);

        let report = crawler(&env, &["http://a.test"], 0, settings()).run().await;

        assert_eq!(report.stats.pages_crawled, 1);
        assert_eq!(report.operations_submitted, 1);
        assert_eq!(env.scheduler.total_submitted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seed_timeout_fails_task_after_all_retries() {
        let browser = Arc::new(StaticBrowser::new().hanging("http://slow.test/"));
        let env = environment(browser.clone(), 10);
        let settings = TaskSettings {
            max_retries: 2,
            ..settings()
        };

        let report = crawler(&env, &["http://slow.test/"], 2, settings).run().await;

        assert_eq!(report.status, TaskStatus::Failed);
        assert_eq!(report.progress, 100);
        assert_eq!(report.stats.errors.len(), 1);
        assert_eq!(report.stats.errors[0].url, "http://slow.test/");
        assert!(report.stats.errors[0].message.contains("timed out"));
        assert_eq!(report.operations_submitted, 3);
        assert_eq!(browser.attempts("http://slow.test/"), 3);

        let metrics = env.metrics.get_metrics().await;
        assert_eq!(metrics.failed_fetches, 3);
        assert_eq!(metrics.slow_fetches, 3);
    }

    #[tokio::test]
    async fn one_failing_seed_does_not_fail_the_task() {
        let browser = Arc::new(three_site_browser().failing("http://down.test/"));
        let env = environment(browser, 10);
        let settings = TaskSettings {
            max_retries: 0,
            ..settings()
        };

        let report = crawler(&env, &["http://down.test/", "http://c.test/"], 1, settings)
            .run()
            .await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.stats.pages_crawled, 1);
        assert_eq!(report.stats.errors.len(), 1);
        assert_eq!(report.stats.errors[0].url, "http://down.test/");
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let browser = Arc::new(three_site_browser().failing("http://c.test/"));
        let env = environment(browser, 2);
        let crawler = crawler(&env, &["http://a.test/"], 1, settings());
        let mut events = env.progress.subscribe(&crawler.task().id);

        let report = crawler.run().await;
        let events = drain(&mut events);

        assert!(events.len() >= 4);
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert!(events[..events.len() - 1].iter().all(|e| e.progress < 100));

        let last = events.last().unwrap();
        assert_eq!(last.status, TaskStatus::Completed);
        assert_eq!(last.progress, 100);
        assert_eq!(report.stats.errors.len(), 1);

        let record = env.store.load(&report.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.pages_crawled, 2);
        assert_eq!(record.error_count, 1);
    }

    #[tokio::test]
    async fn cancelling_stops_further_scheduling() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mut browser = StaticBrowser::new().with_gate(gate.clone());
        let mut home = String::new();
        for n in 0..5 {
            home.push_str(&format!(r#"<a href="/p{n}">p{n}</a>"#));
            browser = browser.with_page(
                &format!("http://a.test/p{n}"),
                format!(r#"<a href="/p{n}/deeper">more</a>"#),
            );
        }
        let browser = Arc::new(browser.with_page("http://a.test/", home));
        let env = environment(browser.clone(), 10);
        let crawler = crawler(&env, &["http://a.test/"], 3, settings());

        let running = tokio::spawn(crawler.clone().run());

        // Let the seed through; its five children then block in navigation
        gate.add_permits(1);
        while browser.navigations() < 6 {
            tokio::task::yield_now().await;
        }
        let submitted = env.scheduler.total_submitted();
        assert_eq!(submitted, 6);

        crawler.cancel();
        gate.add_permits(100);
        let report = running.await.unwrap();

        assert_eq!(report.status, TaskStatus::Cancelled);
        assert!(report.progress < 100);
        assert_eq!(env.scheduler.total_submitted(), submitted);
        assert_eq!(browser.navigations(), 6);
        assert_eq!(report.stats.pages_crawled, 6);
    }

    /// Home page linking to `children` leaf pages, every navigation gated
    fn gated_fan_out(children: usize) -> (Arc<StaticBrowser>, Arc<tokio::sync::Semaphore>) {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mut browser = StaticBrowser::new().with_gate(gate.clone());
        let mut home = String::new();
        for n in 0..children {
            home.push_str(&format!(r#"<a href="/leaf{n}">{n}</a>"#));
            browser = browser.with_page(&format!("http://a.test/leaf{n}"), format!("<p>{PARAGRAPH}</p>"));
        }
        (Arc::new(browser.with_page("http://a.test/", home)), gate)
    }

    async fn until(mut done: impl FnMut() -> bool) {
        while !done() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn cancel_drops_operations_waiting_for_a_slot() {
        let (browser, gate) = gated_fan_out(5);
        let env = environment(browser.clone(), 1);
        let crawler = crawler(&env, &["http://a.test/"], 1, settings());
        let running = tokio::spawn(crawler.clone().run());

        // Seed done, first leaf navigating, four leaves queued behind it
        gate.add_permits(1);
        until(|| browser.navigations() == 2 && env.scheduler.waiting() == 4).await;

        crawler.cancel();
        until(|| env.scheduler.waiting() == 0).await;
        gate.add_permits(100);
        let report = running.await.unwrap();

        assert_eq!(report.status, TaskStatus::Cancelled);
        assert_eq!(browser.navigations(), 2);
        assert_eq!(report.stats.pages_crawled, 2);
        assert!(report.stats.errors.is_empty());
        assert_eq!(env.scheduler.in_flight(), 0);
        assert_eq!(env.scheduler.waiting(), 0);
    }

    #[tokio::test]
    async fn pause_empties_the_queue_until_resumed() {
        let (browser, gate) = gated_fan_out(5);
        let env = environment(browser.clone(), 1);
        let crawler = crawler(&env, &["http://a.test/"], 1, settings());
        let running = tokio::spawn(crawler.clone().run());

        gate.add_permits(1);
        until(|| browser.navigations() == 2 && env.scheduler.waiting() == 4).await;

        assert!(crawler.pause().await);
        until(|| env.scheduler.waiting() == 0).await;

        // The leaf already navigating finishes; nothing else starts
        gate.add_permits(100);
        until(|| env.scheduler.in_flight() == 0).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(browser.navigations(), 2);
        assert_eq!(env.scheduler.waiting(), 0);
        assert_eq!(crawler.status().await, TaskStatus::Paused);

        assert!(crawler.resume().await);
        let report = running.await.unwrap();

        assert_eq!(report.status, TaskStatus::Completed);
        assert_eq!(report.stats.pages_crawled, 6);
        assert!(report.stats.errors.is_empty());
        assert_eq!(browser.navigations(), 6);
    }

    #[tokio::test]
    async fn paused_task_resumes() {
        let browser = Arc::new(three_site_browser());
        let env = environment(browser.clone(), 10);
        let crawler = crawler(&env, &["http://a.test/"], 1, settings());
        let mut events = env.progress.subscribe(&crawler.task().id);

        crawler.control().pause();
        let running = tokio::spawn(crawler.clone().run());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(browser.navigations(), 0);
        assert!(crawler.pause().await);
        assert_eq!(crawler.status().await, TaskStatus::Paused);

        assert!(crawler.resume().await);
        let report = running.await.unwrap();

        assert_eq!(report.status, TaskStatus::Completed);
        let statuses: Vec<_> = drain(&mut events).into_iter().map(|e| e.status).collect();
        assert!(statuses.contains(&TaskStatus::Paused));
        assert_eq!(statuses.last(), Some(&TaskStatus::Completed));
    }

    #[tokio::test]
    async fn browser_open_failures_are_recorded_once_per_url() {
        let mut browser = MockBrowserDriver::new();
        browser
            .expect_open()
            .times(2)
            .returning(|_| Err(FetchError::Session("no browser available".to_string())));
        let env = environment(Arc::new(browser), 10);
        let settings = TaskSettings {
            max_retries: 1,
            ..settings()
        };

        let report = crawler(&env, &["http://a.test/"], 1, settings).run().await;

        assert_eq!(report.status, TaskStatus::Failed);
        assert_eq!(report.stats.errors.len(), 1);
        assert!(report.stats.errors[0].message.contains("no browser available"));
    }

    #[tokio::test]
    async fn session_is_closed_after_navigation() {
        let mut browser = MockBrowserDriver::new();
        browser.expect_open().times(1).returning(|_| {
            let mut session = MockPageSession::new();
            session.expect_navigate().times(1).returning(|url, _| {
                Ok(DomSnapshot::new(
                    url.clone(),
                    "<form><input type=\"password\" name=\"pw\"></form>",
                ))
            });
            session.expect_close().times(1).returning(|| Ok(()));
            Ok(Box::new(session) as Box<dyn PageSession>)
        });
        let env = environment(Arc::new(browser), 10);

        let report = crawler(&env, &["http://login.test/"], 1, settings()).run().await;

        assert_eq!(report.status, TaskStatus::Completed);
        assert!(report.site_structure.unwrap().login_required);
    }
}
