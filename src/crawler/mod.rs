pub mod control;
pub mod controller;
pub mod frontier;
pub mod orchestrator;
pub mod robots;
pub mod scheduler;
pub mod strategy;
pub mod task;

// Re-export common types
pub use control::TaskControl;
pub use controller::{CrawlerController, TaskStatusView};
pub use orchestrator::{CrawlEnvironment, SmartCrawler};
pub use scheduler::{CrawlScheduler, OperationHandle};
pub use task::{CrawlOperation, CrawlStats, CrawlTask, TaskReport, TaskSettings, TaskStatus};
