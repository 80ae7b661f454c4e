//! # Work Queue
//!
//! Pending paths, in-flight ownership and the persisted mirror of the queue.
//!
//! ## Overview
//!
//! All bookkeeping lives behind one mutex:
//! - `pending`: paths waiting for a worker, ordered by priority then age
//! - `in_flight`: paths a worker currently owns
//! - `recheck`: in-flight paths that changed again and must run once more
//! - `removed`: in-flight paths whose source was deleted
//!
//! A path is never both pending and in flight. A change for an in-flight
//! path does not create a second task; it schedules one re-run after the
//! current task releases the path.
//!
//! Pending items are mirrored to the state store so a restart resumes where
//! the previous process stopped. The store row is removed when a worker
//! claims the item.

use core_store::{Priority, QueueItem, StateStore};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// What [`WorkQueue::enqueue`] did with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New pending item
    Queued,
    /// Already pending; merged into the existing item
    Coalesced,
    /// In flight; one re-run will follow the current task
    RecheckScheduled,
}

/// What [`WorkQueue::retract`] did with a deleted path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractOutcome {
    /// Dropped from the pending queue
    Dequeued,
    /// In flight; the running task will see the removal
    MarkedRemoved,
    /// Nothing known about the path
    Unknown,
}

type PendingKey = (Reverse<Priority>, u64);

#[derive(Default)]
struct QueueState {
    pending: BTreeMap<PendingKey, QueueItem>,
    index: HashMap<String, PendingKey>,
    in_flight: HashSet<String>,
    recheck: HashSet<String>,
    removed: HashSet<String>,
    sequence: u64,
    closed: bool,
}

impl QueueState {
    fn insert_pending(&mut self, item: QueueItem) {
        self.sequence += 1;
        let key = (Reverse(item.priority), self.sequence);
        self.index.insert(item.path.clone(), key);
        self.pending.insert(key, item);
    }

    fn remove_pending(&mut self, path: &str) -> Option<QueueItem> {
        let key = self.index.remove(path)?;
        self.pending.remove(&key)
    }

    fn pop_pending(&mut self) -> Option<QueueItem> {
        let (_, item) = self.pending.pop_first()?;
        self.index.remove(&item.path);
        Some(item)
    }

    /// Nothing in flight, and nothing left that a worker would still claim
    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && (self.closed || self.pending.is_empty())
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    store: Arc<dyn StateStore>,
    /// Wakes workers waiting for pending items
    available: Notify,
    /// Wakes callers of [`WorkQueue::wait_idle`]
    idle: Notify,
}

impl WorkQueue {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            store,
            available: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Load items persisted by a previous run
    ///
    /// Returns how many items were added.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the persisted queue cannot be read.
    pub async fn restore(&self) -> Result<usize> {
        let items = self.store.queued_items().await?;
        let mut state = self.state.lock().await;
        let mut restored = 0;
        for item in items {
            if state.index.contains_key(&item.path) || state.in_flight.contains(&item.path) {
                continue;
            }
            state.insert_pending(item);
            restored += 1;
        }
        drop(state);

        if restored > 0 {
            self.available.notify_waiters();
        }
        Ok(restored)
    }

    /// Add a path, or merge it with work already scheduled for it
    ///
    /// # Errors
    ///
    /// - [`SyncError::ShuttingDown`] after [`WorkQueue::close`]
    /// - [`SyncError::Storage`] if the item could not be persisted; the
    ///   in-memory queue is unchanged in that case
    pub async fn enqueue(&self, item: QueueItem) -> Result<EnqueueOutcome> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SyncError::ShuttingDown);
        }

        if state.in_flight.contains(&item.path) {
            state.removed.remove(&item.path);
            state.recheck.insert(item.path.clone());
            debug!(path = %item.path, "Path in flight, re-run scheduled");
            return Ok(EnqueueOutcome::RecheckScheduled);
        }

        if state.index.contains_key(&item.path) {
            return Ok(EnqueueOutcome::Coalesced);
        }

        self.store.enqueue_item(&item).await?;
        debug!(path = %item.path, priority = ?item.priority, "Path queued");
        state.insert_pending(item);
        drop(state);

        self.available.notify_one();
        Ok(EnqueueOutcome::Queued)
    }

    /// Forget about a deleted path
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the persisted item could not be removed.
    pub async fn retract(&self, path: &str) -> Result<RetractOutcome> {
        let mut state = self.state.lock().await;

        if state.in_flight.contains(path) {
            state.recheck.remove(path);
            state.removed.insert(path.to_string());
            return Ok(RetractOutcome::MarkedRemoved);
        }

        if state.remove_pending(path).is_none() {
            return Ok(RetractOutcome::Unknown);
        }
        self.store.remove_item(path).await?;
        if state.is_idle() {
            self.idle.notify_waiters();
        }
        Ok(RetractOutcome::Dequeued)
    }

    /// Wait for the next pending item and take ownership of its path
    ///
    /// Returns `None` once the queue is closed or `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<QueueItem> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(item) = state.pop_pending() {
                    state.in_flight.insert(item.path.clone());
                    let more = !state.pending.is_empty();

                    if let Err(e) = self.store.remove_item(&item.path).await {
                        // The row is only a restart hint; processing it twice is harmless
                        warn!(path = %item.path, error = %e, "Failed to remove persisted queue item");
                    }
                    drop(state);

                    if more {
                        self.available.notify_one();
                    }
                    return Some(item);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Give up ownership of `path` after its task finished
    ///
    /// Returns `true` when a re-run was requested while the task ran and the
    /// path went straight back into the queue.
    pub async fn release(&self, path: &str) -> bool {
        let mut state = self.state.lock().await;
        state.in_flight.remove(path);
        state.removed.remove(path);

        let requeued = state.recheck.remove(path) && !state.closed;
        if requeued {
            let item = QueueItem::new(path);
            if let Err(e) = self.store.enqueue_item(&item).await {
                warn!(path = %path, error = %e, "Failed to persist re-run");
            }
            state.insert_pending(item);
        }

        let idle = state.is_idle();
        drop(state);

        if requeued {
            self.available.notify_one();
        } else if idle {
            self.idle.notify_waiters();
        }
        requeued
    }

    /// Whether the source of an in-flight path was deleted
    pub async fn is_removed(&self, path: &str) -> bool {
        self.state.lock().await.removed.contains(path)
    }

    pub async fn is_in_flight(&self, path: &str) -> bool {
        self.state.lock().await.in_flight.contains(path)
    }

    /// Paths currently owned by workers, sorted
    pub async fn in_flight_paths(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut paths: Vec<String> = state.in_flight.iter().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Number of pending items
    pub async fn depth(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Wait until nothing is pending or in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().await.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop handing out work. Pending items stay persisted for the next run.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        let idle = state.is_idle();
        drop(state);

        self.available.notify_waiters();
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Forget claims held by workers that were aborted mid-cycle.
    ///
    /// Their rows stay PROCESSING in the store and are picked up by recovery
    /// on the next start. Returns the abandoned paths.
    pub async fn abandon_in_flight(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let mut abandoned: Vec<String> = state.in_flight.drain().collect();
        abandoned.sort();
        for path in &abandoned {
            state.recheck.remove(path);
            state.removed.remove(path);
        }
        let idle = state.is_idle();
        drop(state);

        if idle {
            self.idle.notify_waiters();
        }
        abandoned
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_store::db::create_test_pool;
    use core_store::SqliteStateStore;
    use std::time::Duration;

    async fn queue() -> (WorkQueue, Arc<SqliteStateStore>) {
        let pool = create_test_pool().await.unwrap();
        let store = Arc::new(SqliteStateStore::new(pool));
        (WorkQueue::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_pending_paths() {
        let (queue, store) = queue().await;

        assert_eq!(
            queue.enqueue(QueueItem::new("a.md")).await.unwrap(),
            EnqueueOutcome::Queued
        );
        assert_eq!(
            queue.enqueue(QueueItem::new("a.md")).await.unwrap(),
            EnqueueOutcome::Coalesced
        );
        assert_eq!(queue.depth().await, 1);
        assert_eq!(store.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_priority_then_age_ordering() {
        let (queue, _) = queue().await;
        let cancel = CancellationToken::new();

        queue.enqueue(QueueItem::with_priority("low.md", Priority::Low)).await.unwrap();
        queue.enqueue(QueueItem::new("first.md")).await.unwrap();
        queue.enqueue(QueueItem::new("second.md")).await.unwrap();
        queue.enqueue(QueueItem::with_priority("urgent.md", Priority::High)).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(queue.next(&cancel).await.unwrap().path);
        }
        assert_eq!(order, vec!["urgent.md", "first.md", "second.md", "low.md"]);
    }

    #[tokio::test]
    async fn test_in_flight_change_schedules_single_rerun() {
        let (queue, store) = queue().await;
        let cancel = CancellationToken::new();

        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        let item = queue.next(&cancel).await.unwrap();
        assert!(queue.is_in_flight("a.md").await);
        assert_eq!(store.queue_depth().await.unwrap(), 0);

        for _ in 0..3 {
            assert_eq!(
                queue.enqueue(QueueItem::new("a.md")).await.unwrap(),
                EnqueueOutcome::RecheckScheduled
            );
        }
        assert_eq!(queue.depth().await, 0);

        assert!(queue.release(&item.path).await);
        assert_eq!(queue.depth().await, 1);
        assert!(!queue.is_in_flight("a.md").await);

        let again = queue.next(&cancel).await.unwrap();
        assert!(!queue.release(&again.path).await);
        assert_eq!(queue.depth().await, 0);
    }

    #[tokio::test]
    async fn test_retract_pending_and_in_flight() {
        let (queue, store) = queue().await;
        let cancel = CancellationToken::new();

        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        queue.enqueue(QueueItem::new("b.md")).await.unwrap();
        let a = queue.next(&cancel).await.unwrap();
        assert_eq!(a.path, "a.md");

        assert_eq!(queue.retract("b.md").await.unwrap(), RetractOutcome::Dequeued);
        assert_eq!(store.queue_depth().await.unwrap(), 0);

        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        assert_eq!(queue.retract("a.md").await.unwrap(), RetractOutcome::MarkedRemoved);
        assert!(queue.is_removed("a.md").await);

        // Deletion cancels the pending re-run
        assert!(!queue.release("a.md").await);
        assert!(!queue.is_removed("a.md").await);
        assert_eq!(queue.retract("c.md").await.unwrap(), RetractOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_restore_persisted_items() {
        let (queue, store) = queue().await;
        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        queue.enqueue(QueueItem::with_priority("b.md", Priority::High)).await.unwrap();

        let restarted = WorkQueue::new(store.clone());
        assert_eq!(restarted.restore().await.unwrap(), 2);
        assert_eq!(restarted.restore().await.unwrap(), 0);

        let cancel = CancellationToken::new();
        assert_eq!(restarted.next(&cancel).await.unwrap().path, "b.md");
    }

    #[tokio::test]
    async fn test_next_waits_for_work() {
        let (queue, _) = queue().await;
        let queue = Arc::new(queue);
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.next(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(QueueItem::new("late.md")).await.unwrap();

        let item = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.unwrap().path, "late.md");
    }

    #[tokio::test]
    async fn test_close_stops_workers_and_rejects_work() {
        let (queue, _) = queue().await;
        queue.close().await;

        assert!(queue.next(&CancellationToken::new()).await.is_none());
        assert!(matches!(
            queue.enqueue(QueueItem::new("a.md")).await,
            Err(SyncError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiting_worker() {
        let (queue, _) = queue().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let (queue, _) = queue().await;
        let queue = Arc::new(queue);
        let cancel = CancellationToken::new();

        queue.wait_idle().await;

        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        let item = queue.next(&cancel).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.release(&item.path).await;
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_claims_release_idle_waiters() {
        let (queue, store) = queue().await;
        let queue = Arc::new(queue);
        let cancel = CancellationToken::new();

        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        queue.enqueue(QueueItem::new("b.md")).await.unwrap();
        queue.next(&cancel).await.unwrap();
        queue
            .enqueue(QueueItem::new("a.md"))
            .await
            .unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_idle().await })
        };

        // The worker holding a.md never releases it
        queue.close().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert_eq!(queue.abandon_in_flight().await, vec!["a.md".to_string()]);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(queue.in_flight_count().await, 0);
        assert!(!queue.release("a.md").await);
        // b.md was never claimed and stays persisted for the next run
        assert_eq!(store.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_on_close_with_pending_work() {
        let (queue, _) = queue().await;
        queue.enqueue(QueueItem::new("a.md")).await.unwrap();
        queue.close().await;

        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();
        assert_eq!(queue.depth().await, 1);
    }
}
