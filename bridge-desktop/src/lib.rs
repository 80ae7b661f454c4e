//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `NotifyWatchProvider`: recursive change stream using the `notify` crate
//! - `CommandConverter`: runs an external converter (pandoc by default)
//! - `SpoolDelivery`: writes each delivery to a local outbox directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{CommandConverter, NotifyWatchProvider, SpoolDelivery};
//!
//! let watcher = NotifyWatchProvider::new();
//! let converter = CommandConverter::pandoc(config.artifact_dir.clone());
//! let delivery = SpoolDelivery::default_location()?;
//! ```

mod converter;
mod delivery;
mod watch;

pub use converter::{CommandConverter, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
pub use delivery::{Envelope, SpoolDelivery, ENVELOPE_FILE};
pub use watch::NotifyWatchProvider;
