//! # Processing Scheduler
//!
//! Bounded worker pool that turns queued vault paths into delivered documents.
//!
//! ## Overview
//!
//! `workers` tasks share one [`WorkQueue`]. A worker claims a path, runs one
//! processing cycle and releases the path. The queue guarantees a path is
//! owned by at most one worker; changes arriving meanwhile schedule a single
//! re-run.
//!
//! ## Processing cycle
//!
//! 1. Fingerprint the source; stop early if this content was already delivered
//! 2. Validate type and size
//! 3. Mark the record `PROCESSING`
//! 4. Convert source documents (artifacts are delivered as they are)
//! 5. Confirm the source still exists
//! 6. Deliver, then record the terminal status and a duration sample
//!
//! Every convert and deliver attempt is written atomically together with the
//! file record. Classified failures end the cycle as `FAILED_TERMINAL`; only
//! state store failures and shutdown abort a cycle, leaving the record in
//! `PROCESSING` for [`Scheduler::start`] to recover on the next run.
//!
//! ## Shutdown
//!
//! [`Scheduler::shutdown`] stops handing out work, interrupts backoff waits
//! and gives running attempts `shutdown_grace` to finish before aborting the
//! workers.

use async_trait::async_trait;
use bridge_traits::{DeliveryClient, DocumentConverter};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::SyncConfig;
use core_store::{
    DocumentKind, ErrorClass, FileRecord, FileStatus, MetricSample, OperationRecord,
    OperationType, Priority, QueueItem, StateStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ConverterAdapter, DeliveryAdapter};
use crate::detector::ChangeSink;
use crate::error::{AttemptError, Result, SyncError};
use crate::filter::PathFilter;
use crate::fingerprint::fingerprint_file;
use crate::queue::{EnqueueOutcome, RetractOutcome, WorkQueue};
use crate::retry::{AttemptRecorder, RetryController, RetryOutcome};

/// Metric written once per finished cycle, labelled with `status` and `kind`
pub const PROCESSING_DURATION_METRIC: &str = "processing_duration_ms";

/// Collaborators the scheduler needs besides its configuration
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn StateStore>,
    pub converter: Arc<dyn DocumentConverter>,
    pub delivery: Arc<dyn DeliveryClient>,
    pub events: EventBus,
}

/// How a processing cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Converted and delivered
    Succeeded,
    /// This content was already delivered; nothing ran
    Unchanged,
    /// Recorded as `FAILED_TERMINAL`
    Failed { class: ErrorClass, message: String },
}

enum Lifecycle {
    Created,
    Running(JoinSet<()>),
    Stopped,
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    pub fn new(config: SyncConfig, deps: SchedulerDeps) -> Self {
        let shutdown = CancellationToken::new();
        let pipeline = Pipeline {
            filter: PathFilter::from_config(&config),
            queue: WorkQueue::new(deps.store.clone()),
            converter: ConverterAdapter::new(deps.converter),
            delivery: DeliveryAdapter::new(deps.delivery),
            retry: RetryController::new(config.retry.clone(), shutdown.clone()),
            store: deps.store,
            events: deps.events,
            shutdown,
            config,
        };

        Self {
            pipeline: Arc::new(pipeline),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Recover interrupted work and spawn the worker pool
    ///
    /// Records left in `PROCESSING` by a previous run go back to `PENDING`
    /// and are queued again together with the persisted queue.
    ///
    /// # Errors
    ///
    /// - [`SyncError::AlreadyRunning`] if called twice
    /// - [`SyncError::ShuttingDown`] after [`Scheduler::shutdown`]
    /// - [`SyncError::Storage`] if recovery fails
    #[instrument(skip(self), fields(workers = self.pipeline.config.workers))]
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running(_) => return Err(SyncError::AlreadyRunning),
            Lifecycle::Stopped => return Err(SyncError::ShuttingDown),
        }

        let restored = self.pipeline.queue.restore().await?;
        let interrupted = self.pipeline.store.reset_interrupted().await?;
        for path in &interrupted {
            self.pipeline
                .queue
                .enqueue(QueueItem::with_priority(path.as_str(), Priority::Low))
                .await?;
        }

        let mut workers = JoinSet::new();
        for worker_id in 0..self.pipeline.config.workers {
            let pipeline = self.pipeline.clone();
            workers.spawn(async move { pipeline.worker_loop(worker_id).await });
        }

        info!(
            restored,
            interrupted = interrupted.len(),
            "Scheduler started"
        );
        *lifecycle = Lifecycle::Running(workers);
        Ok(())
    }

    /// Queue a path for processing at normal priority
    ///
    /// `path` may be absolute or vault-relative.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidPath`] if the path is outside the vault
    /// - [`SyncError::ShuttingDown`] after shutdown started
    /// - [`SyncError::Storage`] if the item could not be persisted
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> Result<EnqueueOutcome> {
        self.enqueue_with_priority(path, Priority::Normal).await
    }

    /// Queue a path with an explicit priority
    ///
    /// # Errors
    ///
    /// See [`Scheduler::enqueue`].
    pub async fn enqueue_with_priority(
        &self,
        path: impl AsRef<Path>,
        priority: Priority,
    ) -> Result<EnqueueOutcome> {
        let relative = self.pipeline.relative(path.as_ref())?;
        self.enqueue_item(QueueItem::with_priority(relative.as_str(), priority))
            .await
    }

    async fn enqueue_item(&self, item: QueueItem) -> Result<EnqueueOutcome> {
        let relative = item.path.clone();
        let outcome = self.pipeline.queue.enqueue(item).await?;

        if outcome == EnqueueOutcome::Queued {
            self.pipeline
                .emit(SyncEvent::FileQueued { path: relative });
        }
        Ok(outcome)
    }

    /// Tell the scheduler a source file was deleted
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidPath`] if the path is outside the vault
    /// - [`SyncError::Storage`] if the persisted item could not be removed
    pub async fn notify_removed(&self, path: impl AsRef<Path>) -> Result<RetractOutcome> {
        let relative = self.pipeline.relative(path.as_ref())?;
        self.pipeline.queue.retract(&relative).await
    }

    /// Paths currently owned by workers
    pub async fn active_paths(&self) -> Vec<String> {
        self.pipeline.queue.in_flight_paths().await
    }

    pub async fn active_count(&self) -> usize {
        self.pipeline.queue.in_flight_count().await
    }

    /// Pending items not yet claimed by a worker
    pub async fn queue_depth(&self) -> usize {
        self.pipeline.queue.depth().await
    }

    /// Wait until no path is pending or in flight
    pub async fn wait_idle(&self) {
        self.pipeline.queue.wait_idle().await
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    pub fn filter(&self) -> &PathFilter {
        &self.pipeline.filter
    }

    /// Stop the worker pool
    ///
    /// Pending items stay persisted. Workers get `shutdown_grace` to finish
    /// the attempt they are running; whatever is left after that is aborted.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);

        self.pipeline.queue.close().await;
        self.pipeline.shutdown.cancel();

        let Lifecycle::Running(mut workers) = previous else {
            return;
        };

        let grace = self.pipeline.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, drain(&mut workers)).await;
        if drained.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                remaining = workers.len(),
                "Workers still busy after grace period, aborting"
            );
            workers.abort_all();
            drain(&mut workers).await;

            let abandoned = self.pipeline.queue.abandon_in_flight().await;
            if !abandoned.is_empty() {
                warn!(paths = ?abandoned, "Abandoned in-flight files, left for recovery");
            }
        }

        info!("Scheduler stopped");
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "Worker panicked");
            }
        }
    }
}

#[async_trait]
impl ChangeSink for Scheduler {
    async fn submit(&self, path: &Path, observed_at: i64) -> Result<EnqueueOutcome> {
        let relative = self.pipeline.relative(path)?;
        self.enqueue_item(QueueItem::new(relative.as_str()).enqueued_at(observed_at))
            .await
    }

    async fn retract(&self, path: &Path) -> Result<RetractOutcome> {
        self.notify_removed(path).await
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.pipeline.config.workers)
            .field("vault_root", &self.pipeline.config.vault_root)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker side
// ============================================================================

struct Pipeline {
    config: SyncConfig,
    filter: PathFilter,
    store: Arc<dyn StateStore>,
    queue: WorkQueue,
    converter: ConverterAdapter,
    delivery: DeliveryAdapter,
    retry: RetryController,
    events: EventBus,
    shutdown: CancellationToken,
}

impl Pipeline {
    fn relative(&self, path: &Path) -> Result<String> {
        self.filter
            .relative_path(path)
            .ok_or_else(|| SyncError::InvalidPath {
                path: path.display().to_string(),
            })
    }

    fn emit(&self, event: SyncEvent) {
        self.events.emit(CoreEvent::Sync(event)).ok();
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "Worker started");

        while let Some(item) = self.queue.next(&self.shutdown).await {
            match self.process(&item.path).await {
                Ok(outcome) => {
                    debug!(worker_id, path = %item.path, outcome = ?outcome, "Cycle finished");
                }
                Err(SyncError::ShuttingDown) => {
                    info!(worker_id, path = %item.path, "Cycle interrupted by shutdown");
                }
                Err(e) => {
                    error!(
                        worker_id,
                        path = %item.path,
                        error = %e,
                        "Cycle aborted, record left for recovery"
                    );
                }
            }
            self.queue.release(&item.path).await;
        }

        debug!(worker_id, "Worker stopped");
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn process(&self, path: &str) -> Result<ProcessOutcome> {
        let started = Instant::now();
        self.emit(SyncEvent::ProcessingStarted {
            path: path.to_string(),
        });

        let source = self.filter.absolute_path(path);
        let kind = DocumentKind::from_path(&source);
        let existing = self.store.get_file(path).await?;

        let fingerprint = match fingerprint_file(&source).await {
            Ok(fingerprint) => fingerprint,
            Err(error) => {
                let record = existing.unwrap_or_else(|| FileRecord::new(path, "", 0, kind));
                return self.finish_failed(record, error, started).await;
            }
        };

        if let Some(record) = &existing {
            if record.is_success_for(&fingerprint.hash) {
                debug!(hash = %fingerprint.hash, "Content already delivered");
                self.emit(SyncEvent::FileUnchanged {
                    path: path.to_string(),
                });
                return Ok(ProcessOutcome::Unchanged);
            }
        }

        let mut record = existing.unwrap_or_else(|| {
            FileRecord::new(path, fingerprint.hash.as_str(), fingerprint.size, kind)
        });
        record.begin_cycle(fingerprint.hash.as_str(), fingerprint.size, kind);

        if let Err(error) = self.validate(&source, kind, fingerprint.size) {
            return self.finish_failed(record, error, started).await;
        }

        record.id = Some(self.store.upsert_file(&record).await?);

        let artifact = if kind == DocumentKind::SourceDocument {
            let recorder = CycleRecorder::new(self, &record, started, false);
            let converter = &self.converter;
            let source_path = source.as_path();
            let target = self.config.target_format;
            let outcome = self
                .retry
                .run(OperationType::Convert, &recorder, move |_| {
                    converter.convert(source_path, target)
                })
                .await?;

            match outcome {
                RetryOutcome::Succeeded { value, .. } => value,
                RetryOutcome::Failed { error, .. } => {
                    return match recorder.into_terminal() {
                        Some(terminal) => Ok(self.conclude(terminal).await),
                        None => self.finish_failed(record, error, started).await,
                    };
                }
            }
        } else {
            source.clone()
        };

        if self.queue.is_removed(path).await || tokio::fs::metadata(&source).await.is_err() {
            let error = AttemptError::SourceRemoved(format!("{} was deleted before delivery", path));
            return self.finish_failed(record, error, started).await;
        }

        let recorder = CycleRecorder::new(self, &record, started, true);
        let delivery = &self.delivery;
        let artifact_path = artifact.as_path();
        let recipient = self.config.recipient.as_str();
        let outcome = self
            .retry
            .run(OperationType::Deliver, &recorder, move |_| {
                delivery.deliver(artifact_path, recipient)
            })
            .await?;

        // The last deliver attempt already carried the terminal status
        match (recorder.into_terminal(), outcome) {
            (Some(terminal), _) => Ok(self.conclude(terminal).await),
            (None, RetryOutcome::Succeeded { .. }) => self.finish_succeeded(record, started).await,
            (None, RetryOutcome::Failed { error, .. }) => {
                self.finish_failed(record, error, started).await
            }
        }
    }

    fn validate(&self, source: &Path, kind: DocumentKind, size: u64) -> std::result::Result<(), AttemptError> {
        if kind == DocumentKind::Unknown {
            let extension = source
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("none");
            return Err(AttemptError::UnsupportedType(format!(
                "no converter for .{} files",
                extension
            )));
        }

        let limit = self.filter.max_file_size();
        if size > limit {
            return Err(AttemptError::Validation(format!(
                "file is {} bytes, limit is {} bytes",
                size, limit
            )));
        }

        Ok(())
    }

    /// Persist success for a cycle whose last step wrote no attempt record
    async fn finish_succeeded(&self, mut record: FileRecord, started: Instant) -> Result<ProcessOutcome> {
        record.complete(elapsed_ms(started));
        self.store.upsert_file(&record).await?;
        Ok(self.conclude(record).await)
    }

    /// Persist a failure that no adapter attempt recorded (fingerprint,
    /// validation, source removed)
    async fn finish_failed(
        &self,
        mut record: FileRecord,
        error: AttemptError,
        started: Instant,
    ) -> Result<ProcessOutcome> {
        record.fail(error.error_class(), error.to_string(), elapsed_ms(started));
        self.store.upsert_file(&record).await?;
        Ok(self.conclude(record).await)
    }

    /// Metric, log and event for a record whose terminal status is durable
    async fn conclude(&self, record: FileRecord) -> ProcessOutcome {
        let duration_ms = record.duration_ms.unwrap_or(0);
        self.record_duration(&record, duration_ms).await;

        if record.status == FileStatus::Success {
            info!(path = %record.path, duration_ms, "Document delivered");
            self.emit(SyncEvent::FileCompleted {
                path: record.path,
                duration_ms: duration_ms.max(0) as u64,
            });
            return ProcessOutcome::Succeeded;
        }

        let class = record.error_class.unwrap_or(ErrorClass::Permanent);
        let message = record.error_message.clone().unwrap_or_default();
        warn!(path = %record.path, error_class = %class, error = %message, "Processing failed");
        self.emit(SyncEvent::FileFailed {
            path: record.path,
            error_class: class.to_string(),
            message: message.clone(),
        });
        ProcessOutcome::Failed { class, message }
    }

    async fn record_duration(&self, record: &FileRecord, duration_ms: i64) {
        let sample = MetricSample::new(PROCESSING_DURATION_METRIC, duration_ms as f64)
            .with_label("status", record.status.as_str())
            .with_label("kind", record.kind.as_str());

        if let Err(e) = self.store.append_metric(&sample).await {
            warn!(path = %record.path, error = %e, "Failed to record duration sample");
        }
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

/// Writes attempts against the record of the cycle in progress
///
/// The attempt that ends the cycle is written together with the terminal
/// status, so history and status never disagree.
struct CycleRecorder<'a> {
    store: &'a dyn StateStore,
    record: &'a FileRecord,
    events: &'a EventBus,
    started: Instant,
    /// A successful attempt of this operation completes the cycle
    completes_cycle: bool,
    terminal: Mutex<Option<FileRecord>>,
}

impl<'a> CycleRecorder<'a> {
    fn new(
        pipeline: &'a Pipeline,
        record: &'a FileRecord,
        started: Instant,
        completes_cycle: bool,
    ) -> Self {
        Self {
            store: pipeline.store.as_ref(),
            record,
            events: &pipeline.events,
            started,
            completes_cycle,
            terminal: Mutex::new(None),
        }
    }

    /// The terminal record written with the last attempt, if any
    fn into_terminal(self) -> Option<FileRecord> {
        self.terminal.into_inner()
    }

    fn terminal_for(&self, operation: &OperationRecord, will_retry: bool) -> Option<FileRecord> {
        let mut record = self.record.clone();
        if operation.success {
            if !self.completes_cycle {
                return None;
            }
            record.complete(elapsed_ms(self.started));
        } else if !will_retry {
            record.fail(
                operation.error_class.unwrap_or(ErrorClass::Permanent),
                operation.error_message.clone().unwrap_or_default(),
                elapsed_ms(self.started),
            );
        } else {
            return None;
        }
        Some(record)
    }
}

#[async_trait]
impl AttemptRecorder for CycleRecorder<'_> {
    async fn record(&self, operation: &OperationRecord, will_retry: bool) -> core_store::Result<()> {
        let terminal = self.terminal_for(operation, will_retry);
        self.store
            .record_attempt(terminal.as_ref().unwrap_or(self.record), operation)
            .await?;
        if terminal.is_some() {
            *self.terminal.lock().await = terminal;
        }

        if !operation.success {
            let message = operation.error_message.clone().unwrap_or_default();
            debug!(
                path = %self.record.path,
                operation = %operation.operation_type,
                attempt = operation.attempt,
                will_retry,
                error = %message,
                "Attempt failed"
            );
            self.events
                .emit(CoreEvent::Sync(SyncEvent::AttemptFailed {
                    path: self.record.path.clone(),
                    operation: operation.operation_type.to_string(),
                    attempt: operation.attempt,
                    will_retry,
                    message,
                }))
                .ok();
        }
        Ok(())
    }
}
