//! Task progress fan-out.
//!
//! Publishing never blocks and never fails: an event with no subscribers is
//! simply dropped. Subscribers only see events published after they
//! subscribed; the last known state of a task lives in the status store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::trace;

use crate::crawler::task::TaskStatus;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One progress notification for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub progress: u8,
    pub status: TaskStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Receiving side of a progress subscription
pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

/// Broadcast hub keyed by task id, plus a firehose of every task's events
pub struct ProgressChannel {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
    all: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (all, _) = broadcast::channel(capacity);
        Self {
            capacity,
            topics: Mutex::new(HashMap::new()),
            all,
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ProgressEvent>>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fire-and-forget delivery to the task's current subscribers
    pub fn publish(
        &self,
        task_id: &str,
        progress: u8,
        status: TaskStatus,
        message: impl Into<String>,
    ) {
        let event = ProgressEvent {
            task_id: task_id.to_string(),
            progress: progress.min(100),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        };
        trace!(task_id, progress = event.progress, status = %status, "Progress event");

        if let Some(sender) = self.topics().get(task_id) {
            // Err only means nobody is listening right now
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Start a topic for a live task; a no-op if it already exists
    pub fn open(&self, task_id: &str) {
        self.topics()
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    /// Events for one task from now on.
    ///
    /// For a task that is unknown or already closed the stream ends at once;
    /// its last state is in the status store.
    pub fn subscribe(&self, task_id: &str) -> ProgressReceiver {
        match self.topics().get(task_id) {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Events for every task from now on
    pub fn subscribe_all(&self) -> ProgressReceiver {
        self.all.subscribe()
    }

    /// Drop the task's topic; its subscribers see the stream end
    pub fn close(&self, task_id: &str) {
        self.topics().remove(task_id);
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.topics()
            .get(task_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[tokio::test]
    async fn delivers_to_subscribers_of_the_task_only() {
        let channel = ProgressChannel::default();
        channel.open("a");
        channel.open("b");
        let mut a = channel.subscribe("a");
        let mut b = channel.subscribe("b");

        channel.publish("a", 10, TaskStatus::Running, "fetched http://a.test/");

        let event = a.recv().await.unwrap();
        assert_eq!(event.task_id, "a");
        assert_eq!(event.progress, 10);
        assert_eq!(event.status, TaskStatus::Running);
        assert!(matches!(b.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let channel = ProgressChannel::default();
        channel.open("a");
        channel.publish("a", 50, TaskStatus::Running, "before");

        let mut late = channel.subscribe("a");
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));

        channel.publish("a", 60, TaskStatus::Running, "after");
        assert_eq!(late.recv().await.unwrap().message, "after");
    }

    #[tokio::test]
    async fn firehose_sees_every_task_and_close_ends_streams() {
        let channel = ProgressChannel::default();
        let mut all = channel.subscribe_all();
        channel.open("a");
        let mut a = channel.subscribe("a");

        channel.publish("a", 100, TaskStatus::Completed, "done");
        channel.publish("b", 100, TaskStatus::Failed, "done");
        channel.close("a");

        assert_eq!(all.recv().await.unwrap().task_id, "a");
        assert_eq!(all.recv().await.unwrap().task_id, "b");
        assert_eq!(a.recv().await.unwrap().status, TaskStatus::Completed);
        assert!(matches!(a.recv().await, Err(RecvError::Closed)));
        assert_eq!(channel.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn subscribing_to_closed_or_unknown_tasks_leaves_no_topic() {
        let channel = ProgressChannel::default();
        channel.open("a");
        channel.close("a");

        let mut closed = channel.subscribe("a");
        let mut unknown = channel.subscribe("nope");
        assert!(matches!(closed.recv().await, Err(RecvError::Closed)));
        assert!(matches!(unknown.recv().await, Err(RecvError::Closed)));
        assert!(channel.topics().is_empty());
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let channel = ProgressChannel::new(1);
        for pct in 0..=120 {
            channel.publish("nobody", pct, TaskStatus::Running, "");
        }
    }
}
