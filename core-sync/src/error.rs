use bridge_traits::BridgeError;
use core_store::{ErrorClass, StoreError};
use thiserror::Error;

/// Failures that escape the pipeline
///
/// Anything classifiable about a single file is an [`AttemptError`] and is
/// recorded in the state store instead of being returned.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("State store error: {0}")]
    Storage(#[from] StoreError),

    #[error("Change detector failed: {0}")]
    Watcher(String),

    #[error("Path {path} is not inside the vault")]
    InvalidPath { path: String },

    #[error("Pipeline is shutting down")]
    ShuttingDown,

    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Outcome of one failed attempt, already classified
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("Conversion failed: {message}")]
    Conversion { message: String, retryable: bool },

    #[error("Delivery failed: {message}")]
    Delivery { message: String, retryable: bool },

    #[error("Source removed: {0}")]
    SourceRemoved(String),
}

impl AttemptError {
    pub fn conversion(err: BridgeError) -> Self {
        Self::Conversion {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }

    pub fn delivery(err: BridgeError) -> Self {
        Self::Delivery {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }

    /// Only adapter failures marked transient are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conversion { retryable, .. } | Self::Delivery { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn error_class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::UnsupportedType(_) => ErrorClass::Validation,
            Self::SourceRemoved(_) => ErrorClass::SourceRemoved,
            Self::Conversion { .. } | Self::Delivery { .. } if self.is_retryable() => {
                ErrorClass::Transient
            }
            Self::Conversion { .. } | Self::Delivery { .. } => ErrorClass::Permanent,
        }
    }
}
