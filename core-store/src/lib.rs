//! # Sync State Store
//!
//! Durable record of what the pipeline has done to every vault file.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite schema, migrations and connection pooling ([`db`])
//! - Domain models: [`FileRecord`], [`OperationRecord`], [`QueueItem`], [`MetricSample`]
//! - The [`StateStore`] contract and its SQLite implementation
//!
//! The store is the only shared mutable state in the pipeline besides the
//! scheduler's in-flight set. Statistics are computed from it on demand;
//! nothing keeps process-wide counters.

pub mod db;
pub mod error;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{
    now_millis, CleanupReport, DocumentKind, ErrorClass, FileRecord, FileStatus, MetricSample,
    OperationRecord, OperationType, Priority, ProcessingStats, QueueItem, StatusCounts,
};
pub use sqlite::SqliteStateStore;
pub use store::StateStore;
