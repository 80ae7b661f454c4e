//! Delivery Channel Abstraction
//!
//! Sends a finished artifact to the reading device. Delivery is
//! at-least-once: the core may call `send` again for an artifact that was
//! already accepted if the acknowledgement was lost.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Acknowledgement returned by the delivery channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAck {
    /// Channel-specific identifier of the accepted message
    pub message_id: String,
    /// Unix timestamp (milliseconds) when the channel accepted the message
    pub accepted_at: i64,
}

/// Client for the external delivery channel
///
/// Network failures and timeouts should surface as
/// [`BridgeError::Transient`](crate::BridgeError::Transient). An invalid
/// recipient or a rejected attachment is
/// [`BridgeError::Permanent`](crate::BridgeError::Permanent).
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Send `attachment` to `recipient`
    async fn send(&self, recipient: &str, attachment: &Path) -> Result<DeliveryAck>;
}
