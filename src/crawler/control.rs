use tokio::sync::watch;

use crate::error::CrawlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Paused,
    Cancelled,
}

/// Pause/resume/cancel switch shared between a task's handle and its crawler.
///
/// Cancellation is sticky: once cancelled, pause and resume are ignored.
#[derive(Debug, Clone)]
pub struct TaskControl {
    state: watch::Sender<ControlState>,
}

impl TaskControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ControlState::Running);
        Self { state }
    }

    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.state.send_replace(ControlState::Cancelled);
    }

    /// Returns false if the task is already cancelled
    pub fn pause(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ControlState::Running {
                *state = ControlState::Paused;
                true
            } else {
                false
            }
        });
        self.state() != ControlState::Cancelled
    }

    /// Returns false if the task is already cancelled
    pub fn resume(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ControlState::Paused {
                *state = ControlState::Running;
                true
            } else {
                false
            }
        });
        self.state() != ControlState::Cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == ControlState::Cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ControlState::Paused
    }

    /// Wait while paused. Errors once the task is cancelled.
    pub async fn wait_until_runnable(&self) -> Result<(), CrawlError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != ControlState::Paused)
            .await
            .map_err(|_| CrawlError::Cancelled)?;

        match state {
            ControlState::Cancelled => Err(CrawlError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Resolves as soon as the task stops running, paused or cancelled
    pub async fn interrupted(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state != ControlState::Running).await;
    }

    /// Resolves when the task is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only ends on cancellation
        let _ = rx.wait_for(|state| *state == ControlState::Cancelled).await;
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, assert_ready_ok, task};

    #[test]
    fn paused_task_waits_until_resumed() {
        let control = TaskControl::new();
        assert!(control.pause());

        let mut waiting = task::spawn(control.wait_until_runnable());
        assert_pending!(waiting.poll());

        assert!(control.resume());
        assert!(waiting.is_woken());
        assert_ready_ok!(waiting.poll());
    }

    #[test]
    fn cancel_releases_paused_waiters_with_error() {
        let control = TaskControl::new();
        control.pause();

        let mut waiting = task::spawn(control.wait_until_runnable());
        let mut cancelled = task::spawn(control.cancelled());
        assert_pending!(waiting.poll());
        assert_pending!(cancelled.poll());

        control.cancel();
        assert_ready_err!(waiting.poll());
        assert_ready!(cancelled.poll());
    }

    #[test]
    fn pause_and_cancel_both_interrupt() {
        let control = TaskControl::new();
        let mut interrupted = task::spawn(control.interrupted());
        assert_pending!(interrupted.poll());

        control.pause();
        assert!(interrupted.is_woken());
        assert_ready!(interrupted.poll());

        control.resume();
        let mut interrupted = task::spawn(control.interrupted());
        assert_pending!(interrupted.poll());
        control.cancel();
        assert_ready!(interrupted.poll());
    }

    #[test]
    fn cancellation_is_sticky() {
        let control = TaskControl::new();
        control.cancel();

        assert!(!control.pause());
        assert!(!control.resume());
        assert!(control.is_cancelled());
    }
}
