use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a page from the browser driver
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("timed out after {}ms fetching {url}", .after.as_millis())]
    Timeout { url: String, after: Duration },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("browser session error: {0}")]
    Session(String),

    #[error("unsupported URL {0}")]
    Unsupported(String),
}

/// Malformed markup or selector problems. Logged and skipped, never fatal.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },

    #[error("skipped <{element}> element: {reason}")]
    Element { element: String, reason: String },
}

/// Errors raised by the admission scheduler itself
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("scheduler closed before the operation was admitted")]
    Closed,

    #[error("crawl operation panicked: {0}")]
    Panicked(String),
}

impl From<tokio::task::JoinError> for SchedulerError {
    fn from(err: tokio::task::JoinError) -> Self {
        SchedulerError::Panicked(err.to_string())
    }
}

/// Task-level errors surfaced by the controller and orchestrator
#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("task was cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("status store error: {0}")]
    Storage(String),
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
