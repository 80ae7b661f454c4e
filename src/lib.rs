//! Vault sync workspace crate.
//!
//! Re-exports the workspace crates under one name so host applications can
//! depend on `vault-sync` alone. The `desktop-shims` feature (default) pulls
//! in the desktop converter, delivery and watch implementations.
//!
//! ```ignore
//! use vault_sync::service::{bootstrap_desktop, SyncService};
//! use vault_sync::runtime::SyncConfig;
//! ```

pub use bridge_traits as bridge;
pub use core_runtime as runtime;
pub use core_service as service;
pub use core_store as store;
pub use core_sync as sync;

pub use core_runtime::SyncConfig;
pub use core_service::{Result, ServiceError, ServiceStatus, SyncDependencies, SyncService};
