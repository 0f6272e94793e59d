//! Contract for the headless-browser collaborator.
//!
//! A [`BrowserDriver`] opens isolated browser contexts configured with an
//! evasion profile and an optional proxy. Each [`PageSession`] navigates to a
//! page and hands back a [`DomSnapshot`]; everything the crawler knows about a
//! page is derived from that snapshot.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::browser::fingerprint::EvasionProfile;
use crate::error::FetchError;
use crate::proxy::ProxyRecord;

/// When navigation is considered finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    DomContentLoaded,
    Load,
    #[default]
    NetworkIdle,
}

/// Options for one browser context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub profile: Arc<EvasionProfile>,
    pub proxy: Option<Arc<ProxyRecord>>,
}

/// Rendered size of an image, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSize {
    pub width: u32,
    pub height: u32,
}

/// Serialized DOM of a loaded page
#[derive(Debug, Clone)]
pub struct DomSnapshot {
    /// Final URL after redirects; relative links resolve against it
    pub url: Url,

    pub html: String,

    /// Rendered image sizes keyed by absolute image URL, when the driver measured them
    pub image_sizes: HashMap<String, RenderedSize>,
}

impl DomSnapshot {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
            image_sizes: HashMap::new(),
        }
    }
}

/// Factory for browser contexts
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a fresh context with the given proxy and user agent
    async fn open(&self, options: &ContextOptions) -> Result<Box<dyn PageSession>, FetchError>;
}

/// A single browser context
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PageSession: Send {
    /// Navigate and return the loaded DOM
    async fn navigate(&mut self, url: &Url, wait: WaitCondition) -> Result<DomSnapshot, FetchError>;

    /// Evaluate a script in the current page
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, FetchError>;

    /// Release the context
    async fn close(&mut self) -> Result<(), FetchError>;
}
