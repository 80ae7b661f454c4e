//! Converter and delivery adapters
//!
//! Thin wrappers over the bridge traits. Each call is exactly one attempt;
//! retrying is the [`RetryController`](crate::retry::RetryController)'s job.
//! The only thing added here is classification of bridge failures into
//! [`AttemptError`]s.

use bridge_traits::{DeliveryAck, DeliveryClient, DocumentConverter, TargetFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::AttemptError;

#[derive(Clone)]
pub struct ConverterAdapter {
    converter: Arc<dyn DocumentConverter>,
}

impl ConverterAdapter {
    pub fn new(converter: Arc<dyn DocumentConverter>) -> Self {
        Self { converter }
    }

    /// Convert `source` into `target`, returning the artifact path
    ///
    /// # Errors
    ///
    /// [`AttemptError::Conversion`], retryable when the bridge reported a
    /// transient failure.
    #[instrument(skip(self), fields(source = %source.display(), target = %target))]
    pub async fn convert(
        &self,
        source: &Path,
        target: TargetFormat,
    ) -> Result<PathBuf, AttemptError> {
        let artifact = self
            .converter
            .convert(source, target)
            .await
            .map_err(AttemptError::conversion)?;
        debug!(artifact = %artifact.display(), "Conversion finished");
        Ok(artifact)
    }
}

#[derive(Clone)]
pub struct DeliveryAdapter {
    client: Arc<dyn DeliveryClient>,
}

impl DeliveryAdapter {
    pub fn new(client: Arc<dyn DeliveryClient>) -> Self {
        Self { client }
    }

    /// Send `artifact` to `recipient`
    ///
    /// # Errors
    ///
    /// [`AttemptError::Delivery`], retryable when the bridge reported a
    /// transient failure.
    #[instrument(skip(self, recipient), fields(artifact = %artifact.display()))]
    pub async fn deliver(
        &self,
        artifact: &Path,
        recipient: &str,
    ) -> Result<DeliveryAck, AttemptError> {
        let ack = self
            .client
            .send(recipient, artifact)
            .await
            .map_err(AttemptError::delivery)?;
        debug!(message_id = %ack.message_id, "Delivery accepted");
        Ok(ack)
    }
}
