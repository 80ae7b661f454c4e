//! Document Conversion Abstraction
//!
//! The conversion engine itself (layout, OCR, rendering) lives outside the
//! core. Implementations only need to turn one file into another format and
//! report whether a failure is worth retrying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Output format requested from the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Pdf,
    Epub,
    Markdown,
}

impl TargetFormat {
    /// File extension (without the dot) for artifacts of this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Markdown => "md",
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Converts a source document into an artifact
///
/// # Contract
///
/// - Calling `convert` twice with the same input must produce an equivalent
///   artifact, overwriting whatever a previous (possibly partial) run left.
/// - Implementations must not retry internally. Return
///   [`BridgeError::Transient`](crate::BridgeError::Transient) for failures
///   worth repeating and [`BridgeError::Permanent`](crate::BridgeError::Permanent)
///   for everything else.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::convert::{DocumentConverter, TargetFormat};
///
/// async fn render(converter: &dyn DocumentConverter, note: &Path) -> Result<PathBuf> {
///     converter.convert(note, TargetFormat::Pdf).await
/// }
/// ```
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `source` into `target`, returning the artifact path
    async fn convert(&self, source: &Path, target: TargetFormat) -> Result<PathBuf>;
}
