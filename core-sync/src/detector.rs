//! # Change Detector
//!
//! Turns raw filesystem events into debounced enqueue requests.
//!
//! ## Overview
//!
//! - Create and modify events pass the [`PathFilter`], then wait in a
//!   [`Debouncer`] until the path has been quiet for the configured window.
//! - Settled paths are re-checked (still a regular file, within the size
//!   limit) and handed to a [`ChangeSink`], normally the scheduler.
//! - Delete events skip debouncing: the pending burst is dropped and the
//!   sink is told immediately.
//!
//! A broken watch stream is fatal. [`ChangeDetector::run`] returns
//! [`SyncError::Watcher`] instead of silently dropping changes.

use async_trait::async_trait;
use bridge_traits::{WatchEvent, WatchEventKind, WatchProvider};
use core_runtime::events::{CoreEvent, DetectorEvent, EventBus};
use core_store::now_millis;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::debounce::Debouncer;
use crate::error::{Result, SyncError};
use crate::filter::PathFilter;
use crate::queue::{EnqueueOutcome, RetractOutcome};

/// Receiver of settled changes
#[async_trait]
pub trait ChangeSink: Send + Sync {
    /// A path changed and should be processed. `observed_at` is the epoch
    /// millis of the last change seen for it.
    async fn submit(&self, path: &Path, observed_at: i64) -> Result<EnqueueOutcome>;

    /// A path was deleted
    async fn retract(&self, path: &Path) -> Result<RetractOutcome>;
}

pub struct ChangeDetector {
    provider: Arc<dyn WatchProvider>,
    sink: Arc<dyn ChangeSink>,
    filter: PathFilter,
    window: Duration,
    events: EventBus,
}

impl ChangeDetector {
    pub fn new(
        provider: Arc<dyn WatchProvider>,
        sink: Arc<dyn ChangeSink>,
        filter: PathFilter,
        window: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            provider,
            sink,
            filter,
            window,
            events,
        }
    }

    /// Submit every eligible file already in the vault
    ///
    /// Unchanged files cost one fingerprint each and are skipped by the
    /// scheduler. Returns the number of files submitted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the sink cannot persist an item.
    /// Unreadable directories are logged and skipped.
    #[instrument(skip(self), fields(root = %self.filter.vault_root().display()))]
    pub async fn scan_existing(&self) -> Result<usize> {
        let mut submitted = 0;
        let mut directories = vec![self.filter.vault_root().to_path_buf()];

        while let Some(dir) = directories.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Directory listing interrupted");
                        break;
                    }
                };

                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    if self.filter.descends_into(&path) {
                        directories.push(path);
                    }
                } else if file_type.is_file()
                    && self.filter.accepts(&path)
                    && self.submit_settled(&path, now_millis()).await?
                {
                    submitted += 1;
                }
            }
        }

        info!(submitted, "Initial scan finished");
        Ok(submitted)
    }

    /// Watch the vault until `shutdown` fires or the watch breaks
    ///
    /// # Errors
    ///
    /// - [`SyncError::Watcher`] if the subscription fails or its stream ends
    /// - [`SyncError::Storage`] if the sink cannot persist a change
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let root = self.filter.vault_root().to_path_buf();
        let mut subscription = match self.provider.subscribe(&root).await {
            Ok(subscription) => subscription,
            Err(e) => return Err(self.fail(format!("Cannot watch {}: {}", root.display(), e))),
        };

        info!(root = %root.display(), window_ms = self.window.as_millis() as u64, "Change detector started");
        self.emit(DetectorEvent::Started {
            root: root.display().to_string(),
        });

        let mut debouncer = Debouncer::new(self.window);

        loop {
            let deadline = debouncer.next_deadline();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    if !debouncer.is_empty() {
                        debug!(pending = debouncer.len(), "Dropping unsettled changes on shutdown");
                    }
                    info!("Change detector stopped");
                    self.emit(DetectorEvent::Stopped);
                    return Ok(());
                }
                _ = sleep_until(deadline) => {
                    for change in debouncer.drain_due(Instant::now()) {
                        debug!(
                            path = %change.path.display(),
                            events = change.events,
                            "Change settled"
                        );
                        self.submit_settled(&change.path, change.last_observed_at)
                            .await?;
                    }
                }
                received = subscription.events.recv() => match received {
                    Some(Ok(event)) => self.observe(&mut debouncer, event).await?,
                    Some(Err(e)) => return Err(self.fail(format!("Watch stream error: {}", e))),
                    None => return Err(self.fail("Watch stream closed".to_string())),
                },
            }
        }
    }

    async fn observe(&self, debouncer: &mut Debouncer, event: WatchEvent) -> Result<()> {
        if !self.filter.accepts(&event.path) {
            return Ok(());
        }

        match event.kind {
            WatchEventKind::Created | WatchEventKind::Modified => {
                debouncer.observe(event.path, event.observed_at, Instant::now());
            }
            WatchEventKind::Deleted => {
                debouncer.cancel(&event.path);
                let outcome = self.sink.retract(&event.path).await?;
                debug!(path = %event.path.display(), outcome = ?outcome, "Source deleted");
            }
        }
        Ok(())
    }

    /// Hand a settled path to the sink. Returns whether it was submitted.
    async fn submit_settled(&self, path: &Path, observed_at: i64) -> Result<bool> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                debug!(path = %path.display(), "Settled path is gone or not a file");
                return Ok(false);
            }
        };

        if metadata.len() > self.filter.max_file_size() {
            warn!(
                path = %path.display(),
                size = metadata.len(),
                limit = self.filter.max_file_size(),
                "Skipping file above size limit"
            );
            return Ok(false);
        }

        match self.sink.submit(path, observed_at).await {
            Ok(outcome) => {
                debug!(path = %path.display(), outcome = ?outcome, "Change submitted");
                Ok(true)
            }
            Err(SyncError::InvalidPath { path }) => {
                warn!(path = %path, "Ignoring change outside the vault");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn fail(&self, message: String) -> SyncError {
        error!(error = %message, "Change detector failed");
        self.emit(DetectorEvent::Failed {
            message: message.clone(),
        });
        SyncError::Watcher(message)
    }

    fn emit(&self, event: DetectorEvent) {
        self.events.emit(CoreEvent::Detector(event)).ok();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{BridgeError, WatchSubscription};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        submitted: Mutex<Vec<PathBuf>>,
        observed: Mutex<Vec<i64>>,
        retracted: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl ChangeSink for RecordingSink {
        async fn submit(&self, path: &Path, observed_at: i64) -> Result<EnqueueOutcome> {
            self.submitted.lock().unwrap().push(path.to_path_buf());
            self.observed.lock().unwrap().push(observed_at);
            Ok(EnqueueOutcome::Queued)
        }

        async fn retract(&self, path: &Path) -> Result<RetractOutcome> {
            self.retracted.lock().unwrap().push(path.to_path_buf());
            Ok(RetractOutcome::Dequeued)
        }
    }

    /// Hands out one pre-built subscription
    struct ChannelProvider {
        subscription: Mutex<Option<WatchSubscription>>,
    }

    impl ChannelProvider {
        fn new() -> (Self, mpsc::Sender<BridgeResult<WatchEvent>>) {
            let (tx, rx) = mpsc::channel(64);
            let provider = Self {
                subscription: Mutex::new(Some(WatchSubscription::new(rx))),
            };
            (provider, tx)
        }
    }

    #[async_trait]
    impl WatchProvider for ChannelProvider {
        async fn subscribe(&self, _root: &Path) -> BridgeResult<WatchSubscription> {
            self.subscription
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| BridgeError::NotAvailable("already subscribed".into()))
        }
    }

    fn detector(
        vault: &Path,
        provider: Arc<dyn WatchProvider>,
        sink: Arc<RecordingSink>,
    ) -> ChangeDetector {
        let filter = PathFilter::new(
            vault,
            vault.join(".vault-sync").join("artifacts"),
            vec!["md".into(), "pdf".into()],
            1024,
        );
        ChangeDetector::new(
            provider,
            sink,
            filter,
            Duration::from_millis(100),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn test_burst_of_modifications_submits_once() {
        let vault = tempfile::tempdir().unwrap();
        let file = vault.path().join("d.md");
        std::fs::write(&file, "# D").unwrap();

        let (provider, tx) = ChannelProvider::new();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(vault.path(), Arc::new(provider), sink.clone());
        let shutdown = CancellationToken::new();

        let running = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { detector.run(shutdown).await })
        };

        let mut latest = 0;
        for offset in 0..5 {
            let mut event = WatchEvent::new(&file, WatchEventKind::Modified);
            event.observed_at = 1_700_000_000_000 + offset * 10;
            latest = event.observed_at;
            tx.send(Ok(event)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(*sink.submitted.lock().unwrap(), vec![file]);
        assert_eq!(*sink.observed.lock().unwrap(), vec![latest]);
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_burst() {
        let vault = tempfile::tempdir().unwrap();
        let file = vault.path().join("gone.md");
        std::fs::write(&file, "# Gone").unwrap();

        let (provider, tx) = ChannelProvider::new();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(vault.path(), Arc::new(provider), sink.clone());
        let shutdown = CancellationToken::new();

        let running = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { detector.run(shutdown).await })
        };

        tx.send(Ok(WatchEvent::new(&file, WatchEventKind::Created)))
            .await
            .unwrap();
        tx.send(Ok(WatchEvent::new(&file, WatchEventKind::Deleted)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert!(sink.submitted.lock().unwrap().is_empty());
        assert_eq!(*sink.retracted.lock().unwrap(), vec![file]);
    }

    #[tokio::test]
    async fn test_filtered_paths_are_ignored() {
        let vault = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(vault.path().join(".obsidian")).unwrap();
        let hidden = vault.path().join(".obsidian").join("workspace.md");
        let image = vault.path().join("photo.png");
        std::fs::write(&hidden, "x").unwrap();
        std::fs::write(&image, "x").unwrap();

        let (provider, tx) = ChannelProvider::new();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(vault.path(), Arc::new(provider), sink.clone());
        let shutdown = CancellationToken::new();

        let running = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { detector.run(shutdown).await })
        };

        tx.send(Ok(WatchEvent::new(&hidden, WatchEventKind::Modified)))
            .await
            .unwrap();
        tx.send(Ok(WatchEvent::new(&image, WatchEventKind::Created)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert!(sink.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_is_fatal() {
        let vault = tempfile::tempdir().unwrap();
        let (provider, tx) = ChannelProvider::new();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(vault.path(), Arc::new(provider), sink);

        let events = detector.events.clone();
        let mut rx = events.subscribe();

        tx.send(Err(BridgeError::Transient("inotify overflow".into())))
            .await
            .unwrap();

        let result = detector.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(SyncError::Watcher(_))));

        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Detector(DetectorEvent::Started { .. })
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Detector(DetectorEvent::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_stream_is_fatal() {
        let vault = tempfile::tempdir().unwrap();
        let (provider, tx) = ChannelProvider::new();
        drop(tx);

        let detector = detector(vault.path(), Arc::new(provider), Arc::new(RecordingSink::default()));
        let result = detector.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(SyncError::Watcher(_))));
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_fatal() {
        let vault = tempfile::tempdir().unwrap();
        let (provider, _tx) = ChannelProvider::new();
        let provider = Arc::new(provider);
        provider.subscription.lock().unwrap().take();

        let detector = detector(vault.path(), provider, Arc::new(RecordingSink::default()));
        assert!(matches!(
            detector.run(CancellationToken::new()).await,
            Err(SyncError::Watcher(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_existing() {
        let vault = tempfile::tempdir().unwrap();
        let root = vault.path();
        std::fs::create_dir_all(root.join("notes").join("deep")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join(".vault-sync").join("artifacts")).unwrap();

        std::fs::write(root.join("a.md"), "a").unwrap();
        std::fs::write(root.join("notes").join("deep").join("b.md"), "b").unwrap();
        std::fs::write(root.join("notes").join("c.pdf"), "c").unwrap();
        std::fs::write(root.join("notes").join("skip.png"), "x").unwrap();
        std::fs::write(root.join(".git").join("HEAD.md"), "x").unwrap();
        std::fs::write(root.join(".vault-sync").join("artifacts").join("a.pdf"), "x").unwrap();
        std::fs::write(root.join("huge.md"), vec![b'x'; 2048]).unwrap();

        let (provider, _tx) = ChannelProvider::new();
        let sink = Arc::new(RecordingSink::default());
        let detector = detector(root, Arc::new(provider), sink.clone());

        assert_eq!(detector.scan_existing().await.unwrap(), 3);

        let mut submitted = sink.submitted.lock().unwrap().clone();
        submitted.sort();
        let mut expected = vec![
            root.join("a.md"),
            root.join("notes").join("deep").join("b.md"),
            root.join("notes").join("c.pdf"),
        ];
        expected.sort();
        assert_eq!(submitted, expected);
    }
}
