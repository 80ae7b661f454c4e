//! End-to-end tests for the service facade
//!
//! The service runs against a real SQLite file in a temporary vault, the
//! desktop spool delivery and a watch stream driven by the test.

#![cfg(feature = "desktop-shims")]

use async_trait::async_trait;
use bridge_desktop::SpoolDelivery;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    DocumentConverter, TargetFormat, WatchEvent, WatchEventKind, WatchProvider, WatchSubscription,
};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_runtime::{RetryPolicy, SyncConfig};
use core_service::{ServiceError, SyncDependencies, SyncService};
use core_store::db::create_test_pool;
use core_store::{
    now_millis, DocumentKind, FileRecord, FileStatus, SqliteStateStore, StateStore,
};
use core_sync::{HealthStatus, SyncError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ============================================================================
// Test Doubles
// ============================================================================

/// Copies the source into its own directory as the "artifact"
struct CopyConverter {
    out_dir: TempDir,
}

impl CopyConverter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            out_dir: tempfile::tempdir().unwrap(),
        })
    }
}

#[async_trait]
impl DocumentConverter for CopyConverter {
    async fn convert(&self, source: &Path, target: TargetFormat) -> BridgeResult<PathBuf> {
        let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or("doc");
        let artifact = self
            .out_dir
            .path()
            .join(format!("{}.{}", stem, target.extension()));
        tokio::fs::copy(source, &artifact).await?;
        Ok(artifact)
    }
}

/// Watch stream fed by the test; dropping the sender kills the watch
#[derive(Default)]
struct ChannelWatch {
    sender: Mutex<Option<mpsc::Sender<BridgeResult<WatchEvent>>>>,
}

impl ChannelWatch {
    fn sender(&self) -> Option<mpsc::Sender<BridgeResult<WatchEvent>>> {
        self.sender.lock().unwrap().clone()
    }

    fn close(&self) {
        self.sender.lock().unwrap().take();
    }
}

#[async_trait]
impl WatchProvider for ChannelWatch {
    async fn subscribe(&self, _root: &Path) -> BridgeResult<WatchSubscription> {
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(WatchSubscription::new(rx))
    }
}

struct Harness {
    vault: TempDir,
    outbox: TempDir,
    watch: Arc<ChannelWatch>,
}

impl Harness {
    fn new() -> Self {
        Self {
            vault: tempfile::tempdir().unwrap(),
            outbox: tempfile::tempdir().unwrap(),
            watch: Arc::new(ChannelWatch::default()),
        }
    }

    fn config(&self) -> SyncConfig {
        SyncConfig::builder()
            .vault_root(self.vault.path())
            .recipient("reader@kindle.com")
            .workers(2)
            .retry_policy(RetryPolicy::immediate(3))
            .debounce(Duration::from_millis(150))
            .shutdown_grace(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    fn spool(&self) -> SpoolDelivery {
        SpoolDelivery::new(self.outbox.path())
    }

    fn deps(&self) -> SyncDependencies {
        SyncDependencies::new(
            CopyConverter::new(),
            Arc::new(self.spool()),
            self.watch.clone(),
        )
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.vault.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn delivered(&self) -> usize {
        self.spool().pending().await.unwrap().len()
    }
}

async fn wait_for_watch(watch: &ChannelWatch) -> mpsc::Sender<BridgeResult<WatchEvent>> {
    for _ in 0..100 {
        if let Some(sender) = watch.sender() {
            return sender;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("detector never subscribed");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_delivers_existing_files() {
    let harness = Harness::new();
    harness.write("inbox/today.md", "# Today");
    harness.write("archive/old.md", "# Old");

    let service = SyncService::start(harness.config(), harness.deps())
        .await
        .unwrap();
    service.wait_idle().await;

    let store = service.store();
    for path in ["inbox/today.md", "archive/old.md"] {
        let record = store.get_file(path).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Success, "{}", path);
    }
    assert_eq!(harness.delivered().await, 2);

    // The state database lives inside the vault but is never picked up
    assert!(harness.vault.path().join(".vault-sync/state.db").exists());

    let status = service.status().await;
    assert!(status.watching);
    assert_eq!(status.health.status, HealthStatus::Healthy);
    assert_eq!(status.health.files.success, 2);
    assert!(status.active.is_empty());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watch_event_triggers_delivery() {
    let harness = Harness::new();
    let service = SyncService::start(harness.config(), harness.deps())
        .await
        .unwrap();
    let mut events = service.subscribe();
    let sender = wait_for_watch(&harness.watch).await;

    let path = harness.write("new.md", "# Fresh");
    sender
        .send(Ok(WatchEvent::new(&path, WatchEventKind::Created)))
        .await
        .unwrap();

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(CoreEvent::Sync(SyncEvent::FileCompleted { path, .. })) = events.recv().await
            {
                return path;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(completed, "new.md");
    assert_eq!(harness.delivered().await, 1);
    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_skips_unchanged_content() {
    let harness = Harness::new();
    harness.write("note.md", "# Same");

    let first = SyncService::start(harness.config(), harness.deps())
        .await
        .unwrap();
    first.wait_idle().await;
    first.shutdown().await;
    drop(first);
    assert_eq!(harness.delivered().await, 1);

    let second = SyncService::start(harness.config(), harness.deps())
        .await
        .unwrap();
    second.wait_idle().await;

    assert_eq!(harness.delivered().await, 1);
    second.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_watch_failure_is_reported() {
    let harness = Harness::new();
    let service = SyncService::start(harness.config(), harness.deps())
        .await
        .unwrap();
    wait_for_watch(&harness.watch).await;

    harness.watch.close();

    let result = tokio::time::timeout(Duration::from_secs(5), service.detector_stopped())
        .await
        .unwrap();
    assert!(matches!(
        result,
        Err(ServiceError::Sync(SyncError::Watcher(_)))
    ));

    let status = service.status().await;
    assert!(!status.watching);
    assert_eq!(status.health.status, HealthStatus::Unhealthy);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cleanup_applies_retention() {
    let harness = Harness::new();
    let store = Arc::new(SqliteStateStore::new(create_test_pool().await.unwrap()));

    let mut stale = FileRecord::new("stale.md", "h1", 4, DocumentKind::SourceDocument);
    stale.complete(10);
    stale.updated_at = now_millis() - Duration::from_secs(40 * 24 * 3600).as_millis() as i64;
    store.upsert_file(&stale).await.unwrap();

    let mut recent = FileRecord::new("recent.md", "h2", 4, DocumentKind::SourceDocument);
    recent.complete(10);
    store.upsert_file(&recent).await.unwrap();

    let service = SyncService::start(harness.config(), harness.deps().with_store(store.clone()))
        .await
        .unwrap();

    let report = service.cleanup().await.unwrap();
    assert_eq!(report.files_removed, 1);
    assert!(store.get_file("stale.md").await.unwrap().is_none());
    assert!(store.get_file("recent.md").await.unwrap().is_some());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_enqueue_rejects_outside_vault() {
    let harness = Harness::new();
    let service = SyncService::start(harness.config(), harness.deps())
        .await
        .unwrap();

    let outside = tempfile::tempdir().unwrap();
    let result = service.enqueue(outside.path().join("elsewhere.md")).await;
    assert!(matches!(
        result,
        Err(ServiceError::Sync(SyncError::InvalidPath { .. }))
    ));

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_fails_start() {
    let harness = Harness::new();
    let mut config = harness.config();
    config.workers = 0;

    let result = SyncService::start(config, harness.deps()).await;
    assert!(matches!(result, Err(ServiceError::Config(_))));
}
