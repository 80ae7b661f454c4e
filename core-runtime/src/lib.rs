//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the vault sync pipeline:
//! - Logging and tracing infrastructure
//! - Startup configuration and the retry policy value object
//! - Event bus system
//!
//! ## Overview
//!
//! Other workspace crates depend on this one for their ambient concerns. It
//! holds no pipeline logic of its own.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod policy;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{Error, Result};
pub use events::{CoreEvent, DetectorEvent, EventBus, SyncEvent};
pub use policy::RetryPolicy;
