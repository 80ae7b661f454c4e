use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    /// Failure that may succeed when the same call is repeated later
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Failure that will not go away by retrying the same call
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether repeating the operation has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Permanent(_) | Self::InvalidInput(_) | Self::NotAvailable(_) => false,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::BrokenPipe
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BridgeError::Transient("timeout".into()).is_retryable());
        assert!(!BridgeError::Permanent("rejected".into()).is_retryable());
        assert!(!BridgeError::InvalidInput("bad".into()).is_retryable());
        assert!(!BridgeError::NotAvailable("pandoc".into()).is_retryable());
    }

    #[test]
    fn test_io_classification() {
        let timed_out = BridgeError::from(std::io::Error::from(ErrorKind::TimedOut));
        assert!(timed_out.is_retryable());

        let missing = BridgeError::from(std::io::Error::from(ErrorKind::NotFound));
        assert!(!missing.is_retryable());
    }
}
