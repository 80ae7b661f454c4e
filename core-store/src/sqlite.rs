//! SQLite implementation of [`StateStore`]

use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::models::{
    now_millis, CleanupReport, ErrorClass, FileRecord, FileStatus, MetricSample,
    OperationRecord, Priority, ProcessingStats, QueueItem, StatusCounts,
};
use crate::store::StateStore;

const FILE_COLUMNS: &str = "id, path, hash, size, kind, status, error_message, error_class, \
                            duration_ms, created_at, updated_at";

/// SQLite-backed state store
///
/// Reads go straight to the pool. Writes take `write_lock` first so that
/// concurrent workers never race each other into `SQLITE_BUSY`.
pub struct SqliteStateStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStateStore {
    /// Create a store over a pool that already has migrations applied
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, record: &FileRecord) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO file_records (
                path, hash, size, kind, status, error_message, error_class,
                duration_ms, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                size = excluded.size,
                kind = excluded.kind,
                status = excluded.status,
                error_message = excluded.error_message,
                error_class = excluded.error_class,
                duration_ms = excluded.duration_ms,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&record.path)
        .bind(&record.hash)
        .bind(record.size as i64)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.error_class.map(|c| c.as_str()))
        .bind(record.duration_ms)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

#[derive(Debug, FromRow)]
struct FileRecordRow {
    id: i64,
    path: String,
    hash: String,
    size: i64,
    kind: String,
    status: String,
    error_message: Option<String>,
    error_class: Option<String>,
    duration_ms: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<FileRecordRow> for FileRecord {
    type Error = StoreError;

    fn try_from(row: FileRecordRow) -> Result<Self> {
        Ok(FileRecord {
            id: Some(row.id),
            path: row.path,
            hash: row.hash,
            size: row.size.max(0) as u64,
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            error_message: row.error_message,
            error_class: row
                .error_class
                .as_deref()
                .map(str::parse::<ErrorClass>)
                .transpose()?,
            duration_ms: row.duration_ms,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OperationRecordRow {
    id: i64,
    file_id: i64,
    operation_type: String,
    attempt: i64,
    started_at: i64,
    completed_at: i64,
    success: bool,
    error_class: Option<String>,
    error_message: Option<String>,
    metadata: Option<String>,
}

impl TryFrom<OperationRecordRow> for OperationRecord {
    type Error = StoreError;

    fn try_from(row: OperationRecordRow) -> Result<Self> {
        let metadata = match row.metadata {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Null,
        };

        Ok(OperationRecord {
            id: Some(row.id),
            file_id: Some(row.file_id),
            operation_type: row.operation_type.parse()?,
            attempt: row.attempt.max(0) as u32,
            started_at: row.started_at,
            completed_at: row.completed_at,
            success: row.success,
            error_class: row
                .error_class
                .as_deref()
                .map(str::parse::<ErrorClass>)
                .transpose()?,
            error_message: row.error_message,
            metadata,
        })
    }
}

#[derive(Debug, FromRow)]
struct QueueItemRow {
    path: String,
    priority: i32,
    enqueued_at: i64,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = StoreError;

    fn try_from(row: QueueItemRow) -> Result<Self> {
        Ok(QueueItem {
            path: row.path,
            priority: Priority::from_i32(row.priority)?,
            enqueued_at: row.enqueued_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MetricSampleRow {
    name: String,
    value: f64,
    timestamp: i64,
    labels: String,
}

impl TryFrom<MetricSampleRow> for MetricSample {
    type Error = StoreError;

    fn try_from(row: MetricSampleRow) -> Result<Self> {
        let labels: BTreeMap<String, String> = serde_json::from_str(&row.labels)?;
        Ok(MetricSample {
            name: row.name,
            value: row.value,
            timestamp: row.timestamp,
            labels,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// SQLite Implementation
// ============================================================================

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records WHERE path = ?",
            FILE_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let id = Self::upsert_in(&mut tx, record).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn files_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records WHERE status = ? ORDER BY updated_at ASC",
            FILE_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn record_attempt(
        &self,
        record: &FileRecord,
        operation: &OperationRecord,
    ) -> Result<i64> {
        let metadata = if operation.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&operation.metadata)?)
        };

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let file_id = Self::upsert_in(&mut tx, record).await?;

        let operation_id = sqlx::query(
            r#"
            INSERT INTO operation_records (
                file_id, operation_type, attempt, started_at, completed_at,
                success, error_class, error_message, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file_id)
        .bind(operation.operation_type.as_str())
        .bind(operation.attempt as i64)
        .bind(operation.started_at)
        .bind(operation.completed_at)
        .bind(operation.success)
        .bind(operation.error_class.map(|c| c.as_str()))
        .bind(&operation.error_message)
        .bind(metadata)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        debug!(
            path = %record.path,
            operation = %operation.operation_type,
            attempt = operation.attempt,
            success = operation.success,
            "Recorded attempt"
        );

        Ok(operation_id)
    }

    async fn history(&self, path: &str) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query_as::<_, OperationRecordRow>(
            r#"
            SELECT o.id, o.file_id, o.operation_type, o.attempt, o.started_at,
                   o.completed_at, o.success, o.error_class, o.error_message, o.metadata
            FROM operation_records o
            JOIN file_records f ON f.id = o.file_id
            WHERE f.path = ?
            ORDER BY o.started_at ASC, o.id ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn enqueue_item(&self, item: &QueueItem) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO queue_items (path, priority, enqueued_at)
            VALUES (?, ?, ?)
            ON CONFLICT(path) DO NOTHING
            "#,
        )
        .bind(&item.path)
        .bind(item.priority.as_i32())
        .bind(item.enqueued_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_item(&self, path: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM queue_items WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn queued_items(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT path, priority, enqueued_at
            FROM queue_items
            ORDER BY priority DESC, enqueued_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn queue_depth(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn append_metric(&self, sample: &MetricSample) -> Result<()> {
        let labels = serde_json::to_string(&sample.labels)?;

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO metric_samples (name, value, timestamp, labels) VALUES (?, ?, ?, ?)",
        )
        .bind(&sample.name)
        .bind(sample.value)
        .bind(sample.timestamp)
        .bind(labels)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn metrics(&self, name: &str, since: i64) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query_as::<_, MetricSampleRow>(
            r#"
            SELECT name, value, timestamp, labels
            FROM metric_samples
            WHERE name = ? AND timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(name)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn processing_stats(&self, since: i64) -> Result<ProcessingStats> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM file_records WHERE updated_at >= ? GROUP BY status",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut by_status = StatusCounts::default();
        for (status, count) in counts {
            let status: FileStatus = status.parse()?;
            by_status.set(status, count.max(0) as u64);
        }

        let average_duration_ms: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(duration_ms) FROM file_records
            WHERE updated_at >= ?
              AND status IN ('success', 'failed_terminal')
              AND duration_ms IS NOT NULL
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let (attempts, failed_attempts): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0)
            FROM operation_records
            WHERE started_at >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(ProcessingStats {
            since,
            by_status,
            average_duration_ms,
            attempts: attempts.max(0) as u64,
            failed_attempts: failed_attempts.max(0) as u64,
        })
    }

    async fn recent_failures(&self, limit: u32) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(&format!(
            "SELECT {} FROM file_records WHERE status = 'failed_terminal' \
             ORDER BY updated_at DESC, id DESC LIMIT ?",
            FILE_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        collect(rows)
    }

    async fn reset_interrupted(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let paths: Vec<String> =
            sqlx::query_scalar("SELECT path FROM file_records WHERE status = 'processing'")
                .fetch_all(&mut *tx)
                .await?;

        if !paths.is_empty() {
            sqlx::query(
                "UPDATE file_records SET status = 'pending', updated_at = ? WHERE status = 'processing'",
            )
            .bind(now_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !paths.is_empty() {
            info!(count = paths.len(), "Reset interrupted file records to pending");
        }
        Ok(paths)
    }

    async fn cleanup_older_than(&self, cutoff: i64) -> Result<CleanupReport> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let operations_removed: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM operation_records
            WHERE file_id IN (
                SELECT id FROM file_records
                WHERE updated_at < ? AND status IN ('success', 'failed_terminal')
            )
            "#,
        )
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;

        // operation_records cascade
        let files_removed = sqlx::query(
            "DELETE FROM file_records WHERE updated_at < ? AND status IN ('success', 'failed_terminal')",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let metrics_removed = sqlx::query("DELETE FROM metric_samples WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let report = CleanupReport {
            files_removed,
            operations_removed: operations_removed.max(0) as u64,
            metrics_removed,
        };
        info!(
            files = report.files_removed,
            operations = report.operations_removed,
            metrics = report.metrics_removed,
            "Retention cleanup finished"
        );
        Ok(report)
    }

    async fn ping(&self) -> Result<()> {
        crate::db::health_check(&self.pool).await
    }
}
