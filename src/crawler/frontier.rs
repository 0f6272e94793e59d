use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use crate::cli::config::CrawlerSettings;
use crate::utils::{normalize_url, origin_of};

/// Per-task record of visited URLs plus the configured URL filters
pub struct Frontier {
    /// Normalized URLs already claimed by this task
    visited: HashSet<String>,

    /// Claimed URLs in first-visit order
    order: Vec<String>,

    /// Compiled regex patterns for URL inclusion
    include_patterns: Vec<Regex>,

    /// Compiled regex patterns for URL exclusion
    exclude_patterns: Vec<Regex>,

    /// Allowed domains for crawling (if empty, any domain is allowed)
    allowed_domains: Vec<String>,
}

fn compile(patterns: &[String], kind: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid {} pattern '{}': {}", kind, pattern, e);
                None
            }
        })
        .collect()
}

impl Frontier {
    pub fn new(settings: &CrawlerSettings) -> Self {
        Self {
            visited: HashSet::new(),
            order: Vec::new(),
            include_patterns: compile(&settings.url_patterns.include, "include"),
            exclude_patterns: compile(&settings.url_patterns.exclude, "exclude"),
            allowed_domains: settings
                .allowed_domains
                .iter()
                .map(|domain| domain.to_lowercase())
                .collect(),
        }
    }

    /// Whether the configured filters admit this URL (visited state aside)
    pub fn permits(&self, url: &Url) -> bool {
        let normalized = normalize_url(url);

        if !self.allowed_domains.is_empty() {
            let Some(host) = url.host_str() else {
                debug!("Skipping URL without host: {}", normalized);
                return false;
            };
            let host = host.to_lowercase();
            let allowed = self
                .allowed_domains
                .iter()
                .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));
            if !allowed {
                debug!("Skipping URL from non-allowed domain: {}", host);
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|p| p.is_match(&normalized)) {
            debug!("Skipping URL matching exclusion pattern: {}", normalized);
            return false;
        }

        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(&normalized))
        {
            debug!("Skipping URL not matching any inclusion pattern: {}", normalized);
            return false;
        }

        true
    }

    /// Claim a URL for visiting. Returns false if it was already claimed.
    pub fn claim(&mut self, url: &Url) -> bool {
        let normalized = normalize_url(url);
        if self.visited.contains(&normalized) {
            debug!("Skipping already seen URL: {}", normalized);
            return false;
        }
        self.visited.insert(normalized.clone());
        self.order.push(normalized);
        true
    }

    pub fn is_claimed(&self, url: &Url) -> bool {
        self.visited.contains(&normalize_url(url))
    }

    /// Get the current count of claimed URLs
    pub fn claimed_count(&self) -> usize {
        self.visited.len()
    }

    /// Claimed URLs in first-visit order
    pub fn claimed(&self) -> &[String] {
        &self.order
    }
}

/// Whether two URLs share scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    origin_of(a) == origin_of(b)
}
