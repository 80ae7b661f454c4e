//! # Sync Configuration Module
//!
//! Startup configuration for the vault sync pipeline.
//!
//! ## Overview
//!
//! [`SyncConfig`] is built once through [`SyncConfigBuilder`] and is
//! immutable afterwards; there is no hot reload. The builder fails fast with
//! actionable messages so a misconfigured process never starts watching.
//!
//! ## Required Settings
//!
//! - `vault_root` - Existing directory to watch
//! - `recipient` - Delivery address of the reading device
//!
//! Everything else has a default (see [`SyncConfigBuilder`]).
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncConfig;
//! use std::time::Duration;
//!
//! let config = SyncConfig::builder()
//!     .vault_root("/home/me/Vault")
//!     .recipient("me@kindle.com")
//!     .workers(2)
//!     .debounce(Duration::from_millis(500))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::policy::RetryPolicy;
use bridge_traits::TargetFormat;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-vault directory holding the database and artifacts
pub const STATE_DIR_NAME: &str = ".vault-sync";

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

const DEFAULT_WORKERS: usize = 4;
const MAX_WORKERS: usize = 64;
const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
const MIN_DEBOUNCE: Duration = Duration::from_millis(100);
const MAX_DEBOUNCE: Duration = Duration::from_secs(10);
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
const MAX_FILE_SIZE_LIMIT_MB: u64 = 500;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_STATS_WINDOW_DAYS: u32 = 7;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Immutable pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Root of the watched vault
    pub vault_root: PathBuf,

    /// SQLite file holding the state store
    pub database_path: PathBuf,

    /// Where converted artifacts are written; never watched
    pub artifact_dir: PathBuf,

    /// Delivery address of the reading device
    pub recipient: String,

    /// Size of the worker pool
    pub workers: usize,

    /// Attempts and backoff shape for converter and delivery calls
    pub retry: RetryPolicy,

    /// Quiet period before a burst of change events becomes one enqueue
    pub debounce: Duration,

    /// Files above this size fail validation
    pub max_file_size_mb: u64,

    /// Lowercase extensions (without dot) the detector reacts to
    pub extensions: Vec<String>,

    /// Format source documents are converted to
    pub target_format: TargetFormat,

    /// How long in-flight work may run after shutdown is requested
    pub shutdown_grace: Duration,

    /// Age after which terminal records are removed by the retention sweep
    pub retention: Duration,

    /// Rolling window used by the stats reporter
    pub stats_window: Duration,
}

impl SyncConfig {
    /// Creates a new builder for constructing a `SyncConfig`.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Whether `path` has one of the watched extensions (case-insensitive)
    pub fn has_watched_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|watched| *watched == ext)
            })
            .unwrap_or(false)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Vault root exists and is a directory
    /// - Recipient looks like an email address
    /// - Worker count, debounce window and size limit are in range
    /// - Retry policy is usable
    pub fn validate(&self) -> Result<()> {
        if !self.vault_root.is_dir() {
            return Err(Error::Config(format!(
                "Vault root {} does not exist or is not a directory",
                self.vault_root.display()
            )));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        let email = Regex::new(EMAIL_PATTERN)
            .map_err(|e| Error::Internal(format!("Invalid email pattern: {}", e)))?;
        if !email.is_match(&self.recipient) {
            return Err(Error::Config(format!(
                "Recipient '{}' is not a valid email address",
                self.recipient
            )));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(Error::Config(format!(
                "Worker count must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }

        if self.debounce < MIN_DEBOUNCE || self.debounce > MAX_DEBOUNCE {
            return Err(Error::Config(format!(
                "Debounce window must be between {:?} and {:?}, got {:?}",
                MIN_DEBOUNCE, MAX_DEBOUNCE, self.debounce
            )));
        }

        if self.max_file_size_mb == 0 || self.max_file_size_mb > MAX_FILE_SIZE_LIMIT_MB {
            return Err(Error::Config(format!(
                "Max file size must be between 1 and {} MB, got {}",
                MAX_FILE_SIZE_LIMIT_MB, self.max_file_size_mb
            )));
        }

        if self.extensions.is_empty() {
            return Err(Error::Config(
                "At least one watched extension is required".to_string(),
            ));
        }

        self.retry.validate()
    }
}

/// Builder for [`SyncConfig`]
///
/// Defaults:
/// - database: `<vault>/.vault-sync/state.db`
/// - artifacts: `<vault>/.vault-sync/artifacts`
/// - 4 workers, 2 s debounce, 50 MB size limit
/// - extensions `md`, `markdown`, `pdf`
/// - converting to PDF
/// - 30 s shutdown grace, 30 day retention, 7 day stats window
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    vault_root: Option<PathBuf>,
    database_path: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    recipient: Option<String>,
    workers: Option<usize>,
    retry: Option<RetryPolicy>,
    debounce: Option<Duration>,
    max_file_size_mb: Option<u64>,
    extensions: Option<Vec<String>>,
    target_format: Option<TargetFormat>,
    shutdown_grace: Option<Duration>,
    retention_days: Option<u32>,
    stats_window_days: Option<u32>,
}

impl SyncConfigBuilder {
    /// Sets the vault directory to watch (required).
    pub fn vault_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.vault_root = Some(path.into());
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn artifact_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.artifact_dir = Some(path.into());
        self
    }

    /// Sets the delivery address (required).
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    pub fn max_file_size_mb(mut self, size_mb: u64) -> Self {
        self.max_file_size_mb = Some(size_mb);
        self
    }

    /// Replaces the watched extensions. Leading dots are stripped.
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = Some(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn target_format(mut self, format: TargetFormat) -> Self {
        self.target_format = Some(format);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn stats_window_days(mut self, days: u32) -> Self {
        self.stats_window_days = Some(days);
        self
    }

    /// Builds and validates the final `SyncConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required setting is missing or any
    /// value is out of range.
    pub fn build(self) -> Result<SyncConfig> {
        let vault_root = self.vault_root.ok_or_else(|| {
            Error::Config("Vault root is required. Use .vault_root() to set it.".to_string())
        })?;

        let recipient = self.recipient.ok_or_else(|| {
            Error::Config("Recipient is required. Use .recipient() to set it.".to_string())
        })?;

        let state_dir = vault_root.join(STATE_DIR_NAME);

        let config = SyncConfig {
            database_path: self
                .database_path
                .unwrap_or_else(|| state_dir.join("state.db")),
            artifact_dir: self
                .artifact_dir
                .unwrap_or_else(|| state_dir.join("artifacts")),
            vault_root,
            recipient,
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            retry: self.retry.unwrap_or_default(),
            debounce: self.debounce.unwrap_or(DEFAULT_DEBOUNCE),
            max_file_size_mb: self.max_file_size_mb.unwrap_or(DEFAULT_MAX_FILE_SIZE_MB),
            extensions: self.extensions.unwrap_or_else(|| {
                vec!["md".to_string(), "markdown".to_string(), "pdf".to_string()]
            }),
            target_format: self.target_format.unwrap_or(TargetFormat::Pdf),
            shutdown_grace: self.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE),
            retention: DAY * self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            stats_window: DAY * self.stats_window_days.unwrap_or(DEFAULT_STATS_WINDOW_DAYS),
        };

        config.validate()?;

        Ok(config)
    }
}
