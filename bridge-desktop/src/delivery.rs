//! Outbox spool delivery
//!
//! Each delivery becomes a directory under the outbox holding a copy of the
//! attachment and an `envelope.json`. A separate mailer (or a synced folder
//! the device reads from) drains the outbox. Entries are assembled in a
//! staging directory and renamed into place, so readers never see a partial
//! entry.

use async_trait::async_trait;
use bridge_traits::{
    delivery::{DeliveryAck, DeliveryClient},
    error::{BridgeError, Result},
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const ENVELOPE_FILE: &str = "envelope.json";
const STAGING_PREFIX: &str = ".staging-";

/// Metadata stored next to each spooled attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub recipient: String,
    /// File name of the attachment inside the entry directory
    pub attachment: String,
    pub size_bytes: u64,
    /// Unix timestamp (milliseconds)
    pub created_at: i64,
}

/// Delivery client that writes to a local outbox directory
#[derive(Debug, Clone)]
pub struct SpoolDelivery {
    outbox: PathBuf,
}

impl SpoolDelivery {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    /// Outbox under the platform data directory
    ///
    /// # Errors
    ///
    /// Returns `NotAvailable` when the platform has no data directory.
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            BridgeError::NotAvailable("No platform data directory".to_string())
        })?;
        Ok(Self::new(base.join("vault-sync").join("outbox")))
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    /// Envelopes currently waiting in the outbox, oldest first
    pub async fn pending(&self) -> Result<Vec<Envelope>> {
        let mut entries = match tokio::fs::read_dir(&self.outbox).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut envelopes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            let path = entry.path().join(ENVELOPE_FILE);
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Envelope>(&raw) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable envelope"),
            }
        }

        envelopes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        Ok(envelopes)
    }
}

fn validate_recipient(recipient: &str) -> Result<()> {
    let valid = match recipient.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !recipient.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(BridgeError::Permanent(format!(
            "Invalid recipient address: {}",
            recipient
        )))
    }
}

#[async_trait]
impl DeliveryClient for SpoolDelivery {
    async fn send(&self, recipient: &str, attachment: &Path) -> Result<DeliveryAck> {
        validate_recipient(recipient)?;

        let metadata = match tokio::fs::metadata(attachment).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(BridgeError::InvalidInput(format!(
                    "{} is not a file",
                    attachment.display()
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BridgeError::InvalidInput(format!(
                    "Attachment does not exist: {}",
                    attachment.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let file_name = attachment
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BridgeError::InvalidInput(format!("No file name: {}", attachment.display()))
            })?;

        let message_id = uuid::Uuid::new_v4().to_string();
        let staging = self.outbox.join(format!("{}{}", STAGING_PREFIX, message_id));
        let entry = self.outbox.join(&message_id);

        tokio::fs::create_dir_all(&staging).await?;

        let envelope = Envelope {
            message_id: message_id.clone(),
            recipient: recipient.to_string(),
            attachment: file_name.clone(),
            size_bytes: metadata.len(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let written = async {
            tokio::fs::copy(attachment, staging.join(&file_name)).await?;
            let json = serde_json::to_vec_pretty(&envelope)
                .map_err(|e| BridgeError::Permanent(format!("Envelope encoding failed: {}", e)))?;
            tokio::fs::write(staging.join(ENVELOPE_FILE), json).await?;
            tokio::fs::rename(&staging, &entry).await?;
            Ok::<(), BridgeError>(())
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                debug!(error = %cleanup, "Staging cleanup failed");
            }
            return Err(e);
        }

        info!(message_id = %message_id, attachment = %file_name, "Spooled delivery");
        Ok(DeliveryAck {
            message_id,
            accepted_at: envelope.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn attachment(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("note-1a2b3c4d.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        path
    }

    #[tokio::test]
    async fn test_send_spools_entry() {
        let dir = TempDir::new().unwrap();
        let delivery = SpoolDelivery::new(dir.path().join("outbox"));
        let file = attachment(&dir);

        let ack = delivery.send("reader@kindle.com", &file).await.unwrap();

        let entry = delivery.outbox().join(&ack.message_id);
        assert_eq!(std::fs::read(entry.join("note-1a2b3c4d.pdf")).unwrap(), b"%PDF-1.7");

        let pending = delivery.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].recipient, "reader@kindle.com");
        assert_eq!(pending[0].size_bytes, 8);
        assert_eq!(pending[0].created_at, ack.accepted_at);
    }

    #[tokio::test]
    async fn test_each_send_gets_new_message() {
        let dir = TempDir::new().unwrap();
        let delivery = SpoolDelivery::new(dir.path().join("outbox"));
        let file = attachment(&dir);

        let first = delivery.send("reader@kindle.com", &file).await.unwrap();
        let second = delivery.send("reader@kindle.com", &file).await.unwrap();

        assert_ne!(first.message_id, second.message_id);
        assert_eq!(delivery.pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent() {
        let dir = TempDir::new().unwrap();
        let delivery = SpoolDelivery::new(dir.path().join("outbox"));
        let file = attachment(&dir);

        let err = delivery.send("not-an-address", &file).await.unwrap_err();
        assert!(matches!(err, BridgeError::Permanent(_)));
        assert!(delivery.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_attachment_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let delivery = SpoolDelivery::new(dir.path().join("outbox"));

        let err = delivery
            .send("reader@kindle.com", &dir.path().join("gone.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_pending_ignores_staging_and_missing_outbox() {
        let dir = TempDir::new().unwrap();
        let delivery = SpoolDelivery::new(dir.path().join("outbox"));
        assert!(delivery.pending().await.unwrap().is_empty());

        std::fs::create_dir_all(delivery.outbox().join(".staging-abc")).unwrap();
        assert!(delivery.pending().await.unwrap().is_empty());
    }
}
