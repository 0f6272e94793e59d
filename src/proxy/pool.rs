use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

use crate::cli::config::ProxyConfig;

/// Credentials for an authenticated proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

/// One outbound network identity. Owned by the pool; callers hold shared handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    pub name: String,
    pub scheme: String,
    /// `host:port`
    pub address: String,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyRecord {
    /// Build a record from configuration, filling in the scheme's default port
    pub fn from_config(config: &ProxyConfig) -> Option<Self> {
        let (scheme, default_port) = match config.proxy_type.as_str() {
            "http" => ("http", 8080),
            "socks5" => ("socks5", 1080),
            other => {
                warn!("Unsupported proxy type {} for {}", other, config.name);
                return None;
            }
        };

        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(ProxyCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Some(Self {
            name: config.name.clone(),
            scheme: scheme.to_string(),
            address: format!("{}:{}", config.address, config.port.unwrap_or(default_port)),
            credentials,
        })
    }

    /// Proxy URL without credentials, suitable for `--proxy-server`
    pub fn server_url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyHealth {
    Healthy,
    Unhealthy,
}

#[derive(Debug)]
struct ProxyEntry {
    record: Arc<ProxyRecord>,
    health: ProxyHealth,
    last_used: Option<Instant>,
}

/// Health view of one pool entry
#[derive(Debug, Clone)]
pub struct ProxyStatus {
    pub record: Arc<ProxyRecord>,
    pub health: ProxyHealth,
    pub last_used: Option<Instant>,
}

/// Process-wide pool of proxies with uniform random selection over healthy entries
#[derive(Debug, Default)]
pub struct ProxyPool {
    entries: Mutex<Vec<ProxyEntry>>,
}

impl ProxyPool {
    /// Create a pool from configured proxies, skipping unsupported entries
    pub fn new(configs: &[ProxyConfig]) -> Self {
        let entries = configs
            .iter()
            .filter_map(ProxyRecord::from_config)
            .map(|record| ProxyEntry {
                record: Arc::new(record),
                health: ProxyHealth::Healthy,
                last_used: None,
            })
            .collect();

        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Pick a healthy proxy at random; `None` when none is available
    pub fn get_random(&self) -> Option<Arc<ProxyRecord>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let healthy: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.health == ProxyHealth::Healthy)
            .map(|(index, _)| index)
            .collect();

        let index = *healthy.choose(&mut thread_rng())?;
        let entry = &mut entries[index];
        entry.last_used = Some(Instant::now());

        debug!("Selected proxy: {}", entry.record.name);
        Some(entry.record.clone())
    }

    /// Exclude a proxy from selection until it is re-admitted
    pub fn mark_unhealthy(&self, record: &ProxyRecord) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.iter_mut().find(|entry| *entry.record == *record) {
            if entry.health == ProxyHealth::Healthy {
                warn!("Marking proxy as unhealthy: {}", record.name);
            }
            entry.health = ProxyHealth::Unhealthy;
        }
    }

    /// Hook for an external health checker to return a proxy to rotation
    pub fn mark_healthy(&self, record: &ProxyRecord) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.iter_mut().find(|entry| *entry.record == *record) {
            entry.health = ProxyHealth::Healthy;
        }
    }

    pub fn statuses(&self) -> Vec<ProxyStatus> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|entry| ProxyStatus {
                record: entry.record.clone(),
                health: entry.health,
                last_used: entry.last_used,
            })
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.statuses()
            .iter()
            .filter(|status| status.health == ProxyHealth::Healthy)
            .count()
    }
}
