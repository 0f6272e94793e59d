use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::browser::driver::WaitCondition;
use crate::crawler::task::TaskSettings;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    pub crawler: CrawlerSettings,
    pub task_defaults: TaskSettings,
    pub browser: BrowserSettings,
    pub proxy: ProxySettings,
    pub storage: StorageSettings,
    pub progress: ProgressSettings,
}

/// Crawler-specific settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlerSettings {
    pub max_depth: u32,
    pub max_concurrent: usize,
    pub fetch_timeout_ms: u64,
    pub slow_request_ms: u64,
    pub same_origin_only: bool,
    pub max_links_per_page: Option<usize>,
    pub profile_policy: ProfilePolicy,
    pub allowed_domains: Vec<String>,
    pub url_patterns: UrlPatterns,
    pub min_text_length: usize,
    pub min_image_width: u32,
    pub min_image_height: u32,
    /// Token matched against robots.txt `User-agent` groups
    pub user_agent_token: String,
}

/// Whether one evasion profile serves a whole task or each page gets its own
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfilePolicy {
    #[default]
    PerTask,
    PerPage,
}

/// URL pattern settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UrlPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Browser driver settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub wait_condition: WaitCondition,
    pub viewport: Viewport,
    pub fingerprints: Vec<BrowserFingerprint>,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Browser fingerprint settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserFingerprint {
    pub name: String,
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

/// Proxy settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProxySettings {
    pub proxy_list: Vec<ProxyConfig>,
}

/// Individual proxy configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    pub name: String,
    pub proxy_type: String, // "http", "socks5"
    pub address: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Status store settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: String, // "memory", "redis"
    pub redis_url: String,
    pub key_prefix: String,
    pub record_ttl_secs: u64,
}

/// Progress channel settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProgressSettings {
    pub channel_capacity: usize,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_concurrent: 10,
            fetch_timeout_ms: 5000,
            slow_request_ms: 1000,
            same_origin_only: false,
            max_links_per_page: None,
            profile_policy: ProfilePolicy::PerTask,
            allowed_domains: vec![],
            url_patterns: UrlPatterns::default(),
            min_text_length: 50,
            min_image_width: 100,
            min_image_height: 100,
            user_agent_token: "adaptive-crawler".to_string(),
        }
    }
}

impl CrawlerSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_ms)
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            wait_condition: WaitCondition::NetworkIdle,
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            fingerprints: default_fingerprints(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "crawler".to_string(),
            record_ttl_secs: 86400,
        }
    }
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Built-in fingerprints used when a configuration lists none
pub fn default_fingerprints() -> Vec<BrowserFingerprint> {
    vec![
        BrowserFingerprint {
            name: "windows_chrome".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            platform: "Win32".to_string(),
            extra_headers: HashMap::new(),
        },
        BrowserFingerprint {
            name: "mac_safari".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),
            accept_language: "en-GB,en;q=0.8".to_string(),
            platform: "MacIntel".to_string(),
            extra_headers: HashMap::new(),
        },
        BrowserFingerprint {
            name: "linux_firefox".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            accept_language: "de-DE,de;q=0.9,en;q=0.6".to_string(),
            platform: "Linux x86_64".to_string(),
            extra_headers: HashMap::new(),
        },
    ]
}

impl CrawlerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("com", "adaptive-crawler", "adaptive-crawler")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::config_dir()
            .join("sites")
            .join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))
    }

    /// Parse configuration from YAML text; missing fields take their defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the crawler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.crawler.max_concurrent == 0 {
            anyhow::bail!("crawler.max_concurrent must be at least 1");
        }
        if self.crawler.fetch_timeout_ms == 0 {
            anyhow::bail!("crawler.fetch_timeout_ms must be positive");
        }
        if self.progress.channel_capacity == 0 {
            anyhow::bail!("progress.channel_capacity must be at least 1");
        }
        if !self.task_defaults.delay_secs.is_finite() || self.task_defaults.delay_secs < 0.0 {
            anyhow::bail!("task_defaults.delay_secs must be a non-negative number");
        }
        Ok(())
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_path = Self::config_dir().join("default.yaml");
        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let sites_dir = Self::config_dir().join("sites");
        let profile_path = sites_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
