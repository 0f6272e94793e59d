//! Process-wide admission control for crawl operations.
//!
//! At most `max_concurrent` operations execute at once across every task.
//! Callers beyond the cap wait in a FIFO queue; a finishing operation hands
//! its slot directly to the head of the queue, so a later submitter can never
//! overtake an earlier one. A caller that stops waiting (its `submit` future
//! is dropped) leaves the queue without running and without consuming a slot.
//!
//! Operations never hold a slot while waiting on other operations: the slot
//! lives inside the spawned operation and is released when it returns, and
//! the orchestrator composes child visits after that point.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::crawler::task::CrawlOperation;
use crate::error::SchedulerError;

/// Default cap on concurrently executing operations
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

struct Waiter {
    ticket: u64,
    admit: oneshot::Sender<()>,
}

#[derive(Default)]
struct SchedulerState {
    in_flight: usize,
    waiting: VecDeque<Waiter>,
    next_ticket: u64,
    peak_in_flight: usize,
}

struct Shared {
    max_concurrent: usize,
    state: Mutex<SchedulerState>,
    submitted: AtomicUsize,
    completed: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // Nothing panics while holding this lock; recover the data regardless
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Give a freed slot to the oldest live waiter, or return it to the pool
    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiting.pop_front() {
            if waiter.admit.send(()).is_ok() {
                trace!(ticket = waiter.ticket, "Slot handed to queued operation");
                return;
            }
        }
        state.in_flight -= 1;
    }
}

/// Bounded-concurrency admission point shared by every task
#[derive(Clone)]
pub struct CrawlScheduler {
    shared: Arc<Shared>,
}

impl CrawlScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(SchedulerState::default()),
                submitted: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Admit `operation` and run it on the runtime via `executor`.
    ///
    /// Resolves once the operation has been admitted (immediately if a slot
    /// is free, otherwise after every earlier waiter). The returned handle
    /// resolves to the executor's output. A panicking executor yields
    /// [`SchedulerError::Panicked`] and still releases its slot.
    pub async fn submit<F, Fut, T>(
        &self,
        operation: CrawlOperation,
        executor: F,
    ) -> Result<OperationHandle<T>, SchedulerError>
    where
        F: FnOnce(CrawlOperation) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        let url = operation.url.to_string();

        let queued = {
            let mut state = self.shared.lock();
            if state.in_flight < self.shared.max_concurrent && state.waiting.is_empty() {
                state.in_flight += 1;
                state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
                None
            } else {
                let (admit, admitted) = oneshot::channel();
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.waiting.push_back(Waiter { ticket, admit });
                debug!(url = %url, queued = state.waiting.len(), "Scheduler saturated, queueing operation");
                Some(PendingAdmission {
                    shared: self.shared.clone(),
                    ticket,
                    admitted: Some(admitted),
                })
            }
        };

        if let Some(mut pending) = queued {
            pending.wait().await?;
            let mut state = self.shared.lock();
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }

        let slot = Slot {
            shared: self.shared.clone(),
        };
        trace!(url = %url, "Operation admitted");

        let handle = tokio::spawn(async move {
            let _slot = slot;
            executor(operation).await
        });

        Ok(OperationHandle { handle })
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// Operations currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    /// Callers waiting for admission
    pub fn waiting(&self) -> usize {
        self.shared.lock().waiting.len()
    }

    /// Highest number of simultaneously admitted operations observed
    pub fn peak_in_flight(&self) -> usize {
        self.shared.lock().peak_in_flight
    }

    /// Calls to `submit`, including ones later cancelled
    pub fn total_submitted(&self) -> usize {
        self.shared.submitted.load(Ordering::Relaxed)
    }

    /// Operations that ran to completion (successfully or not)
    pub fn total_completed(&self) -> usize {
        self.shared.completed.load(Ordering::Relaxed)
    }
}

impl Default for CrawlScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

/// A queue entry owned by a waiting caller
struct PendingAdmission {
    shared: Arc<Shared>,
    ticket: u64,
    admitted: Option<oneshot::Receiver<()>>,
}

impl PendingAdmission {
    async fn wait(&mut self) -> Result<(), SchedulerError> {
        let Some(admitted) = self.admitted.as_mut() else {
            return Ok(());
        };
        let result = admitted.await.map_err(|_| SchedulerError::Closed);
        // Admitted (or closed): either way the entry is no longer ours to clean up
        self.admitted = None;
        result
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if self.admitted.is_none() {
            return;
        }

        // Cancelled while queued
        let mut state = self.shared.lock();
        if let Some(position) = state.waiting.iter().position(|w| w.ticket == self.ticket) {
            state.waiting.remove(position);
            debug!(ticket = self.ticket, "Queued operation cancelled before admission");
            return;
        }
        drop(state);

        // A slot was handed over after we stopped listening; pass it on
        self.shared.release();
    }
}

/// One occupied concurrency slot, released on drop
struct Slot {
    shared: Arc<Shared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shared.completed.fetch_add(1, Ordering::Relaxed);
        self.shared.release();
    }
}

/// Completion handle of an admitted operation
#[derive(Debug)]
pub struct OperationHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|result| result.map_err(SchedulerError::from))
    }
}
