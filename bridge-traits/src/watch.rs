//! Filesystem Watch Abstraction
//!
//! Provides a recursive change stream for a directory tree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::Result;

/// Kind of change observed on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// A single change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Absolute path of the changed entry
    pub path: PathBuf,
    pub kind: WatchEventKind,
    /// Unix timestamp (milliseconds) when the provider observed the change
    pub observed_at: i64,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Live subscription to a watched tree
///
/// Events arrive on `events`. An `Err` item or the channel closing means the
/// underlying watch is dead; the subscriber must treat that as fatal.
pub struct WatchSubscription {
    pub events: mpsc::Receiver<Result<WatchEvent>>,
    /// Keeps the platform watcher alive for as long as the subscription exists
    guard: Option<Box<dyn Any + Send>>,
}

impl WatchSubscription {
    /// Wrap a receiver with no extra resources to keep alive
    pub fn new(events: mpsc::Receiver<Result<WatchEvent>>) -> Self {
        Self {
            events,
            guard: None,
        }
    }

    /// Wrap a receiver and hold `guard` until the subscription is dropped
    pub fn with_guard(events: mpsc::Receiver<Result<WatchEvent>>, guard: impl Any + Send) -> Self {
        Self {
            events,
            guard: Some(Box::new(guard)),
        }
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("has_guard", &self.guard.is_some())
            .finish()
    }
}

/// Recursive filesystem watch provider
///
/// Implementations must report changes anywhere below `root` and must
/// deliver delete events.
#[async_trait]
pub trait WatchProvider: Send + Sync {
    async fn subscribe(&self, root: &Path) -> Result<WatchSubscription>;
}
