//! # Event Bus System
//!
//! In-process notifications about pipeline progress, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps per-domain enums ([`SyncEvent`], [`DetectorEvent`])
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! Events are informational. The durable record of what happened is the
//! state store; a subscriber that lags or misses events loses nothing that
//! cannot be queried later.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::FileQueued {
//!     path: "notes/today.md".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Sync(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events and can keep receiving.
//! - **`RecvError::Closed`**: every sender is gone, treat it as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-file processing events
    Sync(SyncEvent),
    /// Change detector lifecycle
    Detector(DetectorEvent),
}

impl CoreEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(e) => e.severity(),
            CoreEvent::Detector(e) => e.severity(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Detector(e) => e.description(),
        }
    }
}

/// Events emitted by the processing scheduler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A path entered the pending queue
    FileQueued { path: String },
    /// A worker took ownership of a path
    ProcessingStarted { path: String },
    /// One attempt failed; `will_retry` tells whether the controller will try again
    AttemptFailed {
        path: String,
        operation: String,
        attempt: u32,
        will_retry: bool,
        message: String,
    },
    /// Content was converted and delivered
    FileCompleted { path: String, duration_ms: u64 },
    /// Content was already delivered for this hash
    FileUnchanged { path: String },
    /// The cycle ended without success
    FileFailed {
        path: String,
        error_class: String,
        message: String,
    },
}

impl SyncEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            SyncEvent::FileQueued { .. }
            | SyncEvent::ProcessingStarted { .. }
            | SyncEvent::FileUnchanged { .. } => EventSeverity::Debug,
            SyncEvent::FileCompleted { .. } => EventSeverity::Info,
            SyncEvent::AttemptFailed { .. } => EventSeverity::Warning,
            SyncEvent::FileFailed { .. } => EventSeverity::Error,
        }
    }

    pub fn description(&self) -> String {
        match self {
            SyncEvent::FileQueued { path } => format!("Queued {}", path),
            SyncEvent::ProcessingStarted { path } => format!("Processing {}", path),
            SyncEvent::AttemptFailed {
                path,
                operation,
                attempt,
                will_retry,
                message,
            } => format!(
                "{} attempt {} for {} failed{}: {}",
                operation,
                attempt,
                path,
                if *will_retry { ", retrying" } else { "" },
                message
            ),
            SyncEvent::FileCompleted { path, duration_ms } => {
                format!("Delivered {} in {} ms", path, duration_ms)
            }
            SyncEvent::FileUnchanged { path } => format!("{} unchanged since last delivery", path),
            SyncEvent::FileFailed {
                path,
                error_class,
                message,
            } => format!("{} failed ({}): {}", path, error_class, message),
        }
    }
}

/// Events emitted by the change detector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DetectorEvent {
    Started { root: String },
    /// The watch subscription died; the detector has stopped
    Failed { message: String },
    Stopped,
}

impl DetectorEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            DetectorEvent::Started { .. } | DetectorEvent::Stopped => EventSeverity::Info,
            DetectorEvent::Failed { .. } => EventSeverity::Error,
        }
    }

    pub fn description(&self) -> String {
        match self {
            DetectorEvent::Started { root } => format!("Watching {}", root),
            DetectorEvent::Failed { message } => format!("Change detector failed: {}", message),
            DetectorEvent::Stopped => "Change detector stopped".to_string(),
        }
    }
}

/// Severity level for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel shared by every component that publishes events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus.
    ///
    /// `capacity` is the number of events buffered per subscriber before it
    /// starts receiving `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` that skips events not matching a predicate
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(path: &str) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::FileQueued {
            path: path.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(queued("a.md")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(queued("a.md")).unwrap(), 2);
        assert_eq!(first.recv().await.unwrap(), queued("a.md"));
        assert_eq!(second.recv().await.unwrap(), queued("a.md"));
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Detector(_)));

        bus.emit(queued("a.md")).unwrap();
        bus.emit(CoreEvent::Detector(DetectorEvent::Stopped)).unwrap();

        assert_eq!(
            stream.recv().await.unwrap(),
            CoreEvent::Detector(DetectorEvent::Stopped)
        );
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(queued(&format!("{}.md", i))).unwrap();
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Sync(SyncEvent::FileFailed {
            path: "a.md".into(),
            error_class: "permanent".into(),
            message: "rejected".into(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(queued("a.md").severity(), EventSeverity::Debug);
        assert!(EventSeverity::Error > EventSeverity::Warning);
    }

    #[test]
    fn test_event_description() {
        let event = CoreEvent::Sync(SyncEvent::AttemptFailed {
            path: "a.md".into(),
            operation: "deliver".into(),
            attempt: 2,
            will_retry: true,
            message: "timeout".into(),
        });
        assert_eq!(
            event.description(),
            "deliver attempt 2 for a.md failed, retrying: timeout"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::FileCompleted {
            path: "a.md".into(),
            duration_ms: 12,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Sync\""));
        assert!(json.contains("\"event\":\"FileCompleted\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
