//! # Host Bridge Traits
//!
//! Contracts for the collaborators the sync core talks to but does not own.
//!
//! ## Overview
//!
//! The pipeline never converts, sends or watches anything itself. Each of
//! those capabilities is a trait here so hosts can inject real
//! implementations (see `bridge-desktop`) and tests can inject fakes.
//!
//! ## Traits
//!
//! - [`DocumentConverter`](convert::DocumentConverter) - Turn a source document into an artifact
//! - [`DeliveryClient`](delivery::DeliveryClient) - Send an artifact to the reading device
//! - [`WatchProvider`](watch::WatchProvider) - Recursive change notifications for a directory tree
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). The variant
//! chosen by the implementation is the classification: the core retries
//! only errors for which [`BridgeError::is_retryable`] returns `true`.
//! Implementations must never retry on their own.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a single instance can be
//! shared by every worker.

pub mod convert;
pub mod delivery;
pub mod error;
pub mod watch;

pub use error::BridgeError;

// Re-export commonly used types
pub use convert::{DocumentConverter, TargetFormat};
pub use delivery::{DeliveryAck, DeliveryClient};
pub use watch::{WatchEvent, WatchEventKind, WatchProvider, WatchSubscription};
