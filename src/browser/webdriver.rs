use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::prelude::*;
use tracing::{debug, error, warn};
use url::Url;

use crate::browser::driver::{
    BrowserDriver, ContextOptions, DomSnapshot, PageSession, RenderedSize, WaitCondition,
};
use crate::cli::config::BrowserSettings;
use crate::error::FetchError;

/// Collects the rendered size of every image in document order
const IMAGE_SIZES_SCRIPT: &str = "return Array.from(document.images).map(function (img) { \
    return { src: img.currentSrc || img.src, width: img.width, height: img.height }; });";

const READY_STATE_SCRIPT: &str = "return document.readyState;";

/// Pause after `load` before treating the network as idle
const NETWORK_IDLE_SETTLE: Duration = Duration::from_millis(500);

/// Set by Chrome itself: the user agent through a launch flag, the encoding
/// by the network stack
const BROWSER_MANAGED_HEADERS: [&str; 2] = ["user-agent", "accept-encoding"];

fn session_error(err: WebDriverError) -> FetchError {
    FetchError::Session(err.to_string())
}

/// Profile headers to send with every request of the context
fn extra_http_headers(headers: &BTreeMap<String, String>) -> serde_json::Map<String, serde_json::Value> {
    headers
        .iter()
        .filter(|(name, _)| !BROWSER_MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
        .collect()
}

/// Apply header overrides over the DevTools protocol
async fn apply_headers(driver: &WebDriver, headers: serde_json::Map<String, serde_json::Value>) -> WebDriverResult<()> {
    let dev_tools = ChromeDevTools::new(driver.handle.clone());
    dev_tools.execute_cdp("Network.enable").await?;
    dev_tools
        .execute_cdp_with_params(
            "Network.setExtraHTTPHeaders",
            serde_json::json!({ "headers": headers }),
        )
        .await?;
    Ok(())
}

/// Browser driver backed by a WebDriver endpoint (chromedriver, selenium grid).
///
/// The evasion profile's user agent and launch args go into the Chrome
/// capabilities; its remaining headers are set per context through the
/// DevTools protocol.
pub struct WebDriverBrowser {
    settings: BrowserSettings,
    page_load_timeout: Duration,
}

impl WebDriverBrowser {
    pub fn new(settings: BrowserSettings, page_load_timeout: Duration) -> Self {
        Self {
            settings,
            page_load_timeout,
        }
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn open(&self, options: &ContextOptions) -> Result<Box<dyn PageSession>, FetchError> {
        let mut caps = DesiredCapabilities::chrome();

        caps.add_chrome_arg(&format!("--user-agent={}", options.profile.user_agent))
            .map_err(session_error)?;
        for arg in &options.profile.launch_args {
            caps.add_chrome_arg(arg).map_err(session_error)?;
        }

        if self.settings.headless {
            caps.set_headless().map_err(session_error)?;
        }

        if let Some(proxy) = &options.proxy {
            // Chrome ignores credentials in --proxy-server; authenticated proxies
            // must be whitelisted for this host on the proxy side.
            caps.add_chrome_arg(&format!("--proxy-server={}", proxy.server_url()))
                .map_err(session_error)?;
        }

        let mut experimental_options = HashMap::new();
        experimental_options.insert("excludeSwitches", serde_json::json!(["enable-automation"]));
        experimental_options.insert("useAutomationExtension", serde_json::json!(false));
        for (key, value) in experimental_options {
            caps.add_chrome_option(key, value).map_err(session_error)?;
        }

        let driver = WebDriver::new(&self.settings.webdriver_url, caps)
            .await
            .map_err(session_error)?;

        if let Err(e) = driver.set_page_load_timeout(self.page_load_timeout).await {
            let _ = driver.quit().await;
            return Err(session_error(e));
        }

        let headers = extra_http_headers(&options.profile.headers);
        if !headers.is_empty() {
            // Endpoints without DevTools still crawl, with Chrome's own headers
            if let Err(e) = apply_headers(&driver, headers).await {
                warn!("Could not apply profile headers for {}: {}", options.profile.name, e);
            }
        }

        debug!("Browser context opened with profile: {}", options.profile.name);

        Ok(Box::new(WebDriverSession {
            driver: Some(driver),
        }))
    }
}

/// One WebDriver browser context
pub struct WebDriverSession {
    driver: Option<WebDriver>,
}

#[derive(Deserialize)]
struct MeasuredImage {
    src: String,
    width: u32,
    height: u32,
}

impl WebDriverSession {
    fn driver(&self) -> Result<&WebDriver, FetchError> {
        self.driver
            .as_ref()
            .ok_or_else(|| FetchError::Session("browser session already closed".to_string()))
    }

    async fn wait_for(&mut self, wait: WaitCondition) -> Result<(), FetchError> {
        if wait == WaitCondition::DomContentLoaded {
            return Ok(());
        }

        while self.evaluate(READY_STATE_SCRIPT).await?.as_str() != Some("complete") {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if wait == WaitCondition::NetworkIdle {
            tokio::time::sleep(NETWORK_IDLE_SETTLE).await;
        }
        Ok(())
    }

    async fn measure_images(&mut self) -> HashMap<String, RenderedSize> {
        let measured = match self.evaluate(IMAGE_SIZES_SCRIPT).await {
            Ok(value) => serde_json::from_value::<Vec<MeasuredImage>>(value),
            Err(e) => {
                debug!("Image measurement failed: {}", e);
                return HashMap::new();
            }
        };

        measured
            .map(|images| {
                images
                    .into_iter()
                    .map(|img| {
                        let size = RenderedSize {
                            width: img.width,
                            height: img.height,
                        };
                        (img.src, size)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn navigate(&mut self, url: &Url, wait: WaitCondition) -> Result<DomSnapshot, FetchError> {
        let driver = self.driver()?;

        debug!("Navigating to: {}", url);
        driver
            .goto(url.as_str())
            .await
            .map_err(|e| FetchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        self.wait_for(wait).await?;

        let driver = self.driver()?;
        let html = driver.source().await.map_err(session_error)?;
        let final_url = match driver.current_url().await {
            Ok(current) => Url::parse(current.as_str()).unwrap_or_else(|_| url.clone()),
            Err(_) => url.clone(),
        };

        let mut snapshot = DomSnapshot::new(final_url, html);
        snapshot.image_sizes = self.measure_images().await;
        Ok(snapshot)
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, FetchError> {
        let ret = self
            .driver()?
            .execute(script, Vec::new())
            .await
            .map_err(session_error)?;
        Ok(ret.json().clone())
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await.map_err(session_error)?;
            debug!("Browser session closed");
        }
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Spawn a task to quit the driver
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_overrides_leave_browser_managed_headers_alone() {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), "Mozilla/5.0".to_string());
        headers.insert("Accept-Encoding".to_string(), "gzip".to_string());
        headers.insert("Accept-Language".to_string(), "de-DE,de;q=0.9".to_string());
        headers.insert("DNT".to_string(), "1".to_string());

        let extra = extra_http_headers(&headers);

        assert_eq!(extra.len(), 2);
        assert_eq!(extra["Accept-Language"], "de-DE,de;q=0.9");
        assert_eq!(extra["DNT"], "1");
        assert!(!extra.contains_key("User-Agent"));
    }
}
