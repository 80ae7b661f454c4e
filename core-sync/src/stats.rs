//! # Stats and Health Reporting
//!
//! Read-only view over the state store for dashboards and exporters.
//!
//! Everything is computed on demand from persisted records; the reporter
//! keeps no counters of its own, so two reporters over the same store
//! always agree.

use core_store::{now_millis, ErrorClass, FileRecord, ProcessingStats, StateStore, StatusCounts};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Success rate below which the pipeline reports itself degraded
pub const DEGRADED_SUCCESS_RATE: f64 = 0.8;

/// Success rate below which the pipeline reports itself unhealthy
pub const UNHEALTHY_SUCCESS_RATE: f64 = 0.5;

const DEFAULT_FAILURE_SAMPLES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Verdict for a window of processing statistics
    ///
    /// No terminal records in the window means nothing went wrong.
    pub fn assess(stats: &ProcessingStats) -> Self {
        match stats.success_rate() {
            Some(rate) if rate < UNHEALTHY_SUCCESS_RATE => Self::Unhealthy,
            Some(rate) if rate < DEGRADED_SUCCESS_RATE => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

/// One recent terminal failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSample {
    pub path: String,
    pub error_class: Option<ErrorClass>,
    pub message: Option<String>,
    pub failed_at: i64,
}

impl From<FileRecord> for FailureSample {
    fn from(record: FileRecord) -> Self {
        Self {
            path: record.path,
            error_class: record.error_class,
            message: record.error_message,
            failed_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub generated_at: i64,
    /// Start of the rolling window (Unix millis)
    pub window_start: i64,
    /// Files touched inside the window, by status
    pub files: StatusCounts,
    pub success_rate: Option<f64>,
    pub average_duration_ms: Option<f64>,
    pub attempts: u64,
    pub failed_attempts: u64,
    /// Persisted pending items
    pub queue_depth: u64,
    pub recent_failures: Vec<FailureSample>,
    /// Set when the store could not be queried; the snapshot is then unhealthy
    pub store_error: Option<String>,
}

pub struct StatsReporter {
    store: Arc<dyn StateStore>,
    window: Duration,
    failure_samples: u32,
}

impl StatsReporter {
    pub fn new(store: Arc<dyn StateStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            failure_samples: DEFAULT_FAILURE_SAMPLES,
        }
    }

    /// How many recent failures a snapshot carries
    pub fn with_failure_samples(mut self, samples: u32) -> Self {
        self.failure_samples = samples;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Build a snapshot. Store failures yield an unhealthy snapshot rather than an error.
    pub async fn snapshot(&self) -> HealthSnapshot {
        let generated_at = now_millis();
        let window_start = generated_at - self.window.as_millis() as i64;

        match self.collect(window_start).await {
            Ok((stats, queue_depth, failures)) => HealthSnapshot {
                status: HealthStatus::assess(&stats),
                generated_at,
                window_start,
                files: stats.by_status,
                success_rate: stats.success_rate(),
                average_duration_ms: stats.average_duration_ms,
                attempts: stats.attempts,
                failed_attempts: stats.failed_attempts,
                queue_depth,
                recent_failures: failures.into_iter().map(FailureSample::from).collect(),
                store_error: None,
            },
            Err(e) => {
                warn!(error = %e, "State store unavailable for health snapshot");
                HealthSnapshot {
                    status: HealthStatus::Unhealthy,
                    generated_at,
                    window_start,
                    files: StatusCounts::default(),
                    success_rate: None,
                    average_duration_ms: None,
                    attempts: 0,
                    failed_attempts: 0,
                    queue_depth: 0,
                    recent_failures: Vec::new(),
                    store_error: Some(e.to_string()),
                }
            }
        }
    }

    async fn collect(
        &self,
        since: i64,
    ) -> core_store::Result<(ProcessingStats, u64, Vec<FileRecord>)> {
        self.store.ping().await?;
        let stats = self.store.processing_stats(since).await?;
        let queue_depth = self.store.queue_depth().await?;
        let failures = self.store.recent_failures(self.failure_samples).await?;
        Ok((stats, queue_depth, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_store::db::create_test_pool;
    use core_store::{DocumentKind, QueueItem, SqliteStateStore};

    fn stats(success: u64, failed: u64) -> ProcessingStats {
        let mut stats = ProcessingStats::default();
        stats.by_status.success = success;
        stats.by_status.failed_terminal = failed;
        stats
    }

    #[test]
    fn test_assess_thresholds() {
        assert_eq!(HealthStatus::assess(&stats(0, 0)), HealthStatus::Healthy);
        assert_eq!(HealthStatus::assess(&stats(9, 1)), HealthStatus::Healthy);
        assert_eq!(HealthStatus::assess(&stats(7, 3)), HealthStatus::Degraded);
        assert_eq!(HealthStatus::assess(&stats(1, 3)), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_store() {
        let store = Arc::new(SqliteStateStore::new(create_test_pool().await.unwrap()));

        let mut ok = FileRecord::new("ok.md", "h1", 10, DocumentKind::SourceDocument);
        ok.complete(120);
        store.upsert_file(&ok).await.unwrap();

        let mut bad = FileRecord::new("bad.md", "h2", 10, DocumentKind::SourceDocument);
        bad.fail(ErrorClass::Permanent, "rejected", 80);
        store.upsert_file(&bad).await.unwrap();

        store.enqueue_item(&QueueItem::new("next.md")).await.unwrap();

        let reporter = StatsReporter::new(store, Duration::from_secs(3600));
        let snapshot = reporter.snapshot().await;

        assert_eq!(snapshot.files.success, 1);
        assert_eq!(snapshot.files.failed_terminal, 1);
        assert_eq!(snapshot.success_rate, Some(0.5));
        assert_eq!(snapshot.average_duration_ms, Some(100.0));
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.recent_failures.len(), 1);
        assert_eq!(snapshot.recent_failures[0].path, "bad.md");
        assert_eq!(snapshot.recent_failures[0].error_class, Some(ErrorClass::Permanent));
        assert!(snapshot.store_error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unhealthy() {
        let pool = create_test_pool().await.unwrap();
        let store = Arc::new(SqliteStateStore::new(pool.clone()));
        pool.close().await;

        let snapshot = StatsReporter::new(store, Duration::from_secs(60))
            .snapshot()
            .await;
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert!(snapshot.store_error.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let store = Arc::new(SqliteStateStore::new(create_test_pool().await.unwrap()));
        let snapshot = StatsReporter::new(store, Duration::from_secs(60))
            .snapshot()
            .await;

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queue_depth"], 0);
    }
}
