use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service initialization failed: {0}")]
    Initialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("State store error: {0}")]
    Store(#[from] core_store::StoreError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
