//! Adaptive crawl orchestration.
//!
//! A [`crawler::CrawlerController`] runs crawl tasks over one process-wide
//! [`crawler::CrawlScheduler`], drives an external browser through the
//! [`browser::BrowserDriver`] contract and streams progress through a
//! [`progress::ProgressChannel`].

pub mod browser;
pub mod cli;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod progress;
pub mod proxy;
pub mod storage;
pub mod utils;

pub use error::{CrawlError, CrawlResult, ExtractionError, FetchError, SchedulerError};
