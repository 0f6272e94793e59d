pub mod logging;
pub mod metrics;
pub mod url;

// Re-export common functions and types
pub use logging::{default_log_file, init_logging};
pub use metrics::{FetchMetrics, Metrics, RequestTimer};
pub use self::url::{normalize_url, origin_of, resolve_link};
