//! Recursive filesystem watching backed by `notify`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    watch::{WatchEvent, WatchEventKind, WatchProvider, WatchSubscription},
};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events buffered between the notify thread and the subscriber
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Watch provider using the platform's native notification API
///
/// inotify on Linux, FSEvents on macOS, ReadDirectoryChangesW on Windows.
pub struct NotifyWatchProvider {
    capacity: usize,
}

impl NotifyWatchProvider {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set how many events may queue up before the notify thread blocks
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

impl Default for NotifyWatchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WatchProvider for NotifyWatchProvider {
    async fn subscribe(&self, root: &Path) -> Result<WatchSubscription> {
        if !root.is_dir() {
            return Err(BridgeError::InvalidInput(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let (tx, rx) = mpsc::channel(self.capacity);

        // Runs on the notify thread, outside the async runtime
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let items: Vec<Result<WatchEvent>> = match result {
                Ok(event) => translate(event).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(BridgeError::NotAvailable(format!("watch error: {}", e)))],
            };
            for item in items {
                if tx.blocking_send(item).is_err() {
                    // Subscriber dropped
                    return;
                }
            }
        })
        .map_err(|e| BridgeError::NotAvailable(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to watch {}: {}", root.display(), e))
            })?;

        info!(root = %root.display(), "Filesystem watch established");
        Ok(WatchSubscription::with_guard(
            rx,
            WatcherGuard { _watcher: watcher },
        ))
    }
}

/// Owns the notify watcher; dropping it stops the watch
struct WatcherGuard {
    _watcher: RecommendedWatcher,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        debug!("Filesystem watch released");
    }
}

/// Map one notify event to zero or more watch events
fn translate(event: Event) -> Vec<WatchEvent> {
    let mut paths = event.paths.into_iter();

    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Remove(_) => WatchEventKind::Deleted,
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => WatchEventKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => WatchEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                warn!("Rename event without both paths");
                return Vec::new();
            };
            return vec![
                WatchEvent::new(from, WatchEventKind::Deleted),
                WatchEvent::new(to, WatchEventKind::Created),
            ];
        }
        EventKind::Modify(_) => WatchEventKind::Modified,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    paths.map(|path| WatchEvent::new(path, kind)).collect()
}
