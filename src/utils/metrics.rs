use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Page fetch timing collector shared by every task of a controller
#[derive(Debug, Clone)]
pub struct FetchMetrics {
    /// Fetches slower than this are logged and counted as slow
    slow_threshold: Duration,

    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Total fetch attempts made
    pub total_fetches: usize,

    /// Successful fetches
    pub successful_fetches: usize,

    /// Failed fetches (including timeouts)
    pub failed_fetches: usize,

    /// Fetches exceeding the slow-request threshold
    pub slow_fetches: usize,

    /// Sum of all fetch durations in milliseconds
    pub total_duration_ms: u64,

    /// Longest fetch in milliseconds
    pub max_duration_ms: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            total_fetches: 0,
            successful_fetches: 0,
            failed_fetches: 0,
            slow_fetches: 0,
            total_duration_ms: 0,
            max_duration_ms: 0,
        }
    }
}

impl Metrics {
    /// Mean fetch duration in milliseconds
    pub fn mean_duration_ms(&self) -> f64 {
        if self.total_fetches == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_fetches as f64
        }
    }
}

impl FetchMetrics {
    /// Create a new metrics collector
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            metrics: Arc::new(Mutex::new(Metrics::default())),
        }
    }

    /// Record one fetch attempt
    pub async fn record_fetch(&self, url: &str, success: bool, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let slow = elapsed > self.slow_threshold;
        if slow {
            warn!(url, elapsed_ms, "Slow request");
        }

        let mut metrics = self.metrics.lock().await;
        metrics.total_fetches += 1;
        if success {
            metrics.successful_fetches += 1;
        } else {
            metrics.failed_fetches += 1;
        }
        if slow {
            metrics.slow_fetches += 1;
        }
        metrics.total_duration_ms += elapsed_ms;
        metrics.max_duration_ms = metrics.max_duration_ms.max(elapsed_ms);
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    /// Elapsed time since the timer started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_successes_failures_and_slow_fetches() {
        let metrics = FetchMetrics::new(Duration::from_secs(1));

        metrics.record_fetch("http://a.test", true, Duration::from_millis(200)).await;
        metrics.record_fetch("http://b.test", false, Duration::from_millis(1500)).await;
        metrics.record_fetch("http://c.test", true, Duration::from_millis(1000)).await;

        let snapshot = metrics.get_metrics().await;
        assert_eq!(snapshot.total_fetches, 3);
        assert_eq!(snapshot.successful_fetches, 2);
        assert_eq!(snapshot.failed_fetches, 1);
        // exactly at the threshold is not slow
        assert_eq!(snapshot.slow_fetches, 1);
        assert_eq!(snapshot.max_duration_ms, 1500);
        assert!((snapshot.mean_duration_ms() - 900.0).abs() < f64::EPSILON);
    }
}
