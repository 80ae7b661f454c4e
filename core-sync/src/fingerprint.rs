//! Content fingerprinting
//!
//! Files are hashed in fixed-size chunks so memory use does not depend on
//! file size. The hex digest is the identity used for deduplication.

use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::AttemptError;

/// Read buffer size
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Lowercase hex SHA-256
    pub hash: String,
    /// Bytes actually hashed
    pub size: u64,
}

/// Hash the current content of `path`
///
/// # Errors
///
/// - [`AttemptError::SourceRemoved`] when the file no longer exists
/// - [`AttemptError::Validation`] for any other read failure, or when the
///   path is not a regular file
pub async fn fingerprint_file(path: &Path) -> Result<Fingerprint, AttemptError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| read_error(path, e))?;
    if !metadata.is_file() {
        return Err(AttemptError::Validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| read_error(path, e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| read_error(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok(Fingerprint {
        hash: format!("{:x}", hasher.finalize()),
        size,
    })
}

fn read_error(path: &Path, err: std::io::Error) -> AttemptError {
    if err.kind() == ErrorKind::NotFound {
        AttemptError::SourceRemoved(path.display().to_string())
    } else {
        AttemptError::Validation(format!("Cannot read {}: {}", path.display(), err))
    }
}
