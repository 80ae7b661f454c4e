//! # State Store Contract
//!
//! Durable persistence for file records, attempt history, the pending queue
//! and metric samples.
//!
//! ## Guarantees
//!
//! - At most one [`FileRecord`] per path.
//! - [`StateStore::record_attempt`] writes the file record and the operation
//!   record in a single transaction, so history and current status never
//!   diverge.
//! - Writers are serialized at the store boundary; any number of workers may
//!   call the store concurrently.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    CleanupReport, FileRecord, FileStatus, MetricSample, OperationRecord, ProcessingStats,
    QueueItem,
};

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Find the record for a vault-relative path
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>>;

    /// Insert or update the record keyed by `record.path`, returning its id
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn upsert_file(&self, record: &FileRecord) -> Result<i64>;

    /// All records currently in `status`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn files_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>>;

    /// Atomically upsert `record` and append `operation` to its history
    ///
    /// Returns the id of the new operation record.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is written in that case
    async fn record_attempt(&self, record: &FileRecord, operation: &OperationRecord) -> Result<i64>;

    /// Attempt history for a path, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn history(&self, path: &str) -> Result<Vec<OperationRecord>>;

    /// Persist a pending queue item
    ///
    /// Returns `false` when an item for the same path is already queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn enqueue_item(&self, item: &QueueItem) -> Result<bool>;

    /// Remove the pending item for `path`, returning whether one existed
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn remove_item(&self, path: &str) -> Result<bool>;

    /// All pending items in dequeue order (priority, then age)
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn queued_items(&self) -> Result<Vec<QueueItem>>;

    /// Number of persisted pending items
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn queue_depth(&self) -> Result<u64>;

    /// Append a metric sample
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn append_metric(&self, sample: &MetricSample) -> Result<()>;

    /// Samples named `name` taken at or after `since`, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn metrics(&self, name: &str, since: i64) -> Result<Vec<MetricSample>>;

    /// Aggregate statistics for records updated at or after `since`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn processing_stats(&self, since: i64) -> Result<ProcessingStats>;

    /// Most recently failed records, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn recent_failures(&self, limit: u32) -> Result<Vec<FileRecord>>;

    /// Move records stuck in `PROCESSING` back to `PENDING`
    ///
    /// Only meaningful at startup, before any worker runs. Returns the
    /// affected paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn reset_interrupted(&self) -> Result<Vec<String>>;

    /// Delete terminal records, their history, and metric samples older than `cutoff`
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn cleanup_older_than(&self, cutoff: i64) -> Result<CleanupReport>;

    /// Check that the store is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the database does not answer
    async fn ping(&self) -> Result<()>;
}
