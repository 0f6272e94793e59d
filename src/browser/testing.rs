//! In-memory browser driver serving fixed HTML, for tests and dry runs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use url::Url;

use crate::browser::driver::{
    BrowserDriver, ContextOptions, DomSnapshot, PageSession, WaitCondition,
};
use crate::error::FetchError;
use crate::utils::normalize_url;

#[derive(Debug, Default)]
struct Activity {
    opened: AtomicUsize,
    open_sessions: AtomicUsize,
    peak_sessions: AtomicUsize,
    /// Navigation attempts per normalized URL
    navigations: Mutex<HashMap<String, usize>>,
    /// Proxy used by each opened context, in order
    proxies: Mutex<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Default)]
struct Site {
    pages: HashMap<String, String>,
    hanging: HashSet<String>,
    failing: HashSet<String>,
}

/// Serves registered pages; unknown URLs fail like a 404 navigation.
///
/// URLs marked hanging never finish loading, failing ones error at once.
/// With a gate, each navigation waits for one semaphore permit.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    site: Arc<Site>,
    gate: Option<Arc<Semaphore>>,
    activity: Arc<Activity>,
}

fn key(url: &str) -> String {
    Url::parse(url).map_or_else(|_| url.to_string(), |url| normalize_url(&url))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl StaticBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.site).pages.insert(key(url), html.into());
        self
    }

    pub fn hanging(mut self, url: &str) -> Self {
        Arc::make_mut(&mut self.site).hanging.insert(key(url));
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        Arc::make_mut(&mut self.site).failing.insert(key(url));
        self
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Browser contexts opened so far
    pub fn opened(&self) -> usize {
        self.activity.opened.load(Ordering::SeqCst)
    }

    /// Most contexts open at the same time
    pub fn peak_sessions(&self) -> usize {
        self.activity.peak_sessions.load(Ordering::SeqCst)
    }

    /// Navigations started, over all URLs
    pub fn navigations(&self) -> usize {
        lock(&self.activity.navigations).values().sum()
    }

    /// Navigations started for one URL
    pub fn attempts(&self, url: &str) -> usize {
        lock(&self.activity.navigations)
            .get(&key(url))
            .copied()
            .unwrap_or(0)
    }

    /// Proxy name used by each opened context, in order
    pub fn proxies_used(&self) -> Vec<Option<String>> {
        lock(&self.activity.proxies).clone()
    }
}

#[async_trait]
impl BrowserDriver for StaticBrowser {
    async fn open(&self, options: &ContextOptions) -> Result<Box<dyn PageSession>, FetchError> {
        self.activity.opened.fetch_add(1, Ordering::SeqCst);
        let open = self.activity.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.activity.peak_sessions.fetch_max(open, Ordering::SeqCst);
        lock(&self.activity.proxies).push(options.proxy.as_ref().map(|p| p.name.clone()));

        Ok(Box::new(StaticSession {
            browser: self.clone(),
            current: None,
            closed: false,
        }))
    }
}

struct StaticSession {
    browser: StaticBrowser,
    current: Option<DomSnapshot>,
    closed: bool,
}

impl StaticSession {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.browser
                .activity
                .open_sessions
                .fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PageSession for StaticSession {
    async fn navigate(&mut self, url: &Url, _wait: WaitCondition) -> Result<DomSnapshot, FetchError> {
        let key = normalize_url(url);
        *lock(&self.browser.activity.navigations)
            .entry(key.clone())
            .or_default() += 1;

        if let Some(gate) = &self.browser.gate {
            gate.acquire()
                .await
                .map_err(|e| FetchError::Session(e.to_string()))?
                .forget();
        }

        let site = &self.browser.site;
        if site.hanging.contains(&key) {
            std::future::pending::<()>().await;
        }
        if site.failing.contains(&key) {
            return Err(FetchError::Navigation {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let html = site.pages.get(&key).ok_or_else(|| FetchError::Navigation {
            url: url.to_string(),
            message: "HTTP 404".to_string(),
        })?;
        let snapshot = DomSnapshot::new(url.clone(), html.clone());
        self.current = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, FetchError> {
        match (script.trim(), &self.current) {
            ("return document.readyState;", Some(_)) => Ok(serde_json::json!("complete")),
            ("return document.URL;", Some(page)) => Ok(serde_json::json!(page.url.as_str())),
            _ => Err(FetchError::Unsupported(format!(
                "script not supported by the static browser: {}",
                script
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        self.release();
        Ok(())
    }
}

impl Drop for StaticSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fingerprint::EvasionProfile;

    fn options() -> ContextOptions {
        ContextOptions {
            profile: Arc::new(EvasionProfile::default()),
            proxy: None,
        }
    }

    #[tokio::test]
    async fn serves_registered_pages_by_normalized_url() {
        let browser = StaticBrowser::new().with_page("http://a.test/", "<p>hi</p>");
        let mut session = browser.open(&options()).await.unwrap();

        let page = session
            .navigate(&Url::parse("http://A.test:80").unwrap(), WaitCondition::Load)
            .await
            .unwrap();
        assert_eq!(page.html, "<p>hi</p>");
        assert_eq!(
            session.evaluate("return document.readyState;").await.unwrap(),
            "complete"
        );

        let missing = session
            .navigate(&Url::parse("http://a.test/missing").unwrap(), WaitCondition::Load)
            .await;
        assert!(matches!(missing, Err(FetchError::Navigation { .. })));

        assert_eq!(browser.peak_sessions(), 1);
        session.close().await.unwrap();
        assert_eq!(browser.attempts("http://a.test"), 1);
        assert_eq!(browser.navigations(), 2);
    }
}
