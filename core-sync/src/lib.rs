//! # Vault Sync Pipeline
//!
//! Moves changed vault documents to a reading device.
//!
//! ## Overview
//!
//! - [`ChangeDetector`]: filesystem events in, debounced enqueue requests out
//! - [`Scheduler`]: bounded worker pool, one in-flight task per path
//! - [`RetryController`]: per-operation retries with classified errors
//! - [`fingerprint_file`]: streaming SHA-256 used for deduplication
//! - [`StatsReporter`]: health and statistics over the state store
//!
//! Durable state lives in `core-store`; converters, delivery and watching
//! are reached through `bridge-traits`.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{ChangeDetector, PathFilter, Scheduler, SchedulerDeps};
//!
//! let scheduler = Arc::new(Scheduler::new(config.clone(), deps));
//! scheduler.start().await?;
//!
//! let detector = ChangeDetector::new(
//!     watcher,
//!     scheduler.clone(),
//!     PathFilter::from_config(&config),
//!     config.debounce,
//!     events,
//! );
//! detector.scan_existing().await?;
//! detector.run(shutdown.clone()).await?;
//! ```

pub mod adapters;
pub mod debounce;
pub mod detector;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use adapters::{ConverterAdapter, DeliveryAdapter};
pub use debounce::{Debouncer, SettledChange};
pub use detector::{ChangeDetector, ChangeSink};
pub use error::{AttemptError, Result, SyncError};
pub use filter::PathFilter;
pub use fingerprint::{fingerprint_file, Fingerprint};
pub use queue::{EnqueueOutcome, RetractOutcome, WorkQueue};
pub use retry::{AttemptRecorder, RetryController, RetryOutcome};
pub use scheduler::{ProcessOutcome, Scheduler, SchedulerDeps, PROCESSING_DURATION_METRIC};
pub use stats::{FailureSample, HealthSnapshot, HealthStatus, StatsReporter};
