//! Domain models for the sync state store
//!
//! Timestamps are Unix milliseconds throughout. Paths are vault-relative and
//! use `/` as separator so records stay stable across platforms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, StoreError};

/// Current time as Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Enumerations
// =============================================================================

/// Processing status of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Known but not yet picked up by a worker
    Pending,
    /// A worker owns the path
    Processing,
    /// Converted and delivered for the recorded hash
    Success,
    /// Gave up; needs a new change or manual re-enqueue
    FailedTerminal,
}

impl FileStatus {
    pub const ALL: [FileStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Success,
        Self::FailedTerminal,
    ];

    /// Convert status to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::FailedTerminal => "failed_terminal",
        }
    }

    /// Check if status is terminal (success or failed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::FailedTerminal)
    }

    /// Check if status is active (pending or processing)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl FromStr for FileStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed_terminal" => Ok(Self::FailedTerminal),
            _ => Err(StoreError::InvalidData(format!("Invalid file status: {}", s))),
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a vault file, derived from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Editable text that must be converted before delivery
    SourceDocument,
    /// Already in a device-readable format
    Artifact,
    Unknown,
}

impl DocumentKind {
    /// Classify a path by extension (case-insensitive)
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("md") | Some("markdown") | Some("txt") => Self::SourceDocument,
            Some("pdf") | Some("epub") => Self::Artifact,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceDocument => "source_document",
            Self::Artifact => "artifact",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source_document" => Ok(Self::SourceDocument),
            "artifact" => Ok(Self::Artifact),
            "unknown" => Ok(Self::Unknown),
            _ => Err(StoreError::InvalidData(format!("Invalid document kind: {}", s))),
        }
    }
}

/// Step of the pipeline an [`OperationRecord`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Convert,
    Deliver,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Deliver => "deliver",
        }
    }
}

impl FromStr for OperationType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "convert" => Ok(Self::Convert),
            "deliver" => Ok(Self::Deliver),
            _ => Err(StoreError::InvalidData(format!("Invalid operation type: {}", s))),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification attached to a failed attempt or a failed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed, unreadable or unsupported source
    Validation,
    /// Retryable adapter failure
    Transient,
    /// Non-retryable adapter failure
    Permanent,
    /// The source disappeared while the cycle was running
    SourceRemoved,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::SourceRemoved => "source_removed",
        }
    }
}

impl FromStr for ErrorClass {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "validation" => Ok(Self::Validation),
            "transient" => Ok(Self::Transient),
            "permanent" => Ok(Self::Permanent),
            "source_removed" => Ok(Self::SourceRemoved),
            _ => Err(StoreError::InvalidData(format!("Invalid error class: {}", s))),
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority level for queued paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    /// Background work such as recovery after a restart
    Low = 0,
    /// Regular change events
    #[default]
    Normal = 1,
    /// Explicit user requests
    High = 2,
}

impl Priority {
    /// Convert priority to database integer
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse priority from database integer
    pub fn from_i32(i: i32) -> Result<Self> {
        match i {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            _ => Err(StoreError::InvalidData(format!("Invalid priority: {}", i))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Latest known processing outcome for a vault-relative path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Database id, `None` until the record has been written
    pub id: Option<i64>,
    pub path: String,
    /// Hex-encoded SHA-256 of the content
    pub hash: String,
    pub size: u64,
    pub kind: DocumentKind,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub error_class: Option<ErrorClass>,
    /// Wall time of the last finished cycle
    pub duration_ms: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileRecord {
    /// Create a pending record for content that has just been fingerprinted
    pub fn new(path: impl Into<String>, hash: impl Into<String>, size: u64, kind: DocumentKind) -> Self {
        let now = now_millis();
        Self {
            id: None,
            path: path.into(),
            hash: hash.into(),
            size,
            kind,
            status: FileStatus::Pending,
            error_message: None,
            error_class: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when this exact content has already been delivered
    pub fn is_success_for(&self, hash: &str) -> bool {
        self.status == FileStatus::Success && self.hash == hash
    }

    /// Start a new cycle for (possibly new) content
    pub fn begin_cycle(&mut self, hash: impl Into<String>, size: u64, kind: DocumentKind) {
        self.hash = hash.into();
        self.size = size;
        self.kind = kind;
        self.status = FileStatus::Processing;
        self.error_message = None;
        self.error_class = None;
        self.updated_at = now_millis();
    }

    pub fn complete(&mut self, duration_ms: i64) {
        self.status = FileStatus::Success;
        self.error_message = None;
        self.error_class = None;
        self.duration_ms = Some(duration_ms);
        self.updated_at = now_millis();
    }

    pub fn fail(&mut self, class: ErrorClass, message: impl Into<String>, duration_ms: i64) {
        self.status = FileStatus::FailedTerminal;
        self.error_class = Some(class);
        self.error_message = Some(message.into());
        self.duration_ms = Some(duration_ms);
        self.updated_at = now_millis();
    }
}

/// One processing attempt. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Option<i64>,
    /// Owning [`FileRecord`] id, filled in by the store on write
    pub file_id: Option<i64>,
    pub operation_type: OperationType,
    /// 1-based attempt number within the cycle
    pub attempt: u32,
    pub started_at: i64,
    pub completed_at: i64,
    pub success: bool,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl OperationRecord {
    /// A successful attempt
    pub fn succeeded(operation_type: OperationType, attempt: u32, started_at: i64) -> Self {
        Self {
            id: None,
            file_id: None,
            operation_type,
            attempt,
            started_at,
            completed_at: now_millis(),
            success: true,
            error_class: None,
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// A failed attempt
    pub fn failed(
        operation_type: OperationType,
        attempt: u32,
        started_at: i64,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_class: Some(class),
            error_message: Some(message.into()),
            ..Self::succeeded(operation_type, attempt, started_at)
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Unit of pending work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub path: String,
    pub priority: Priority,
    pub enqueued_at: i64,
}

impl QueueItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_priority(path, Priority::Normal)
    }

    pub fn with_priority(path: impl Into<String>, priority: Priority) -> Self {
        Self {
            path: path.into(),
            priority,
            enqueued_at: now_millis(),
        }
    }

    /// Stamp the item with the time its change was last observed
    pub fn enqueued_at(mut self, at: i64) -> Self {
        self.enqueued_at = at;
        self
    }
}

/// Point-in-time counter or gauge observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
    pub labels: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: now_millis(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// File counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed_terminal: u64,
}

impl StatusCounts {
    pub fn get(&self, status: FileStatus) -> u64 {
        match status {
            FileStatus::Pending => self.pending,
            FileStatus::Processing => self.processing,
            FileStatus::Success => self.success,
            FileStatus::FailedTerminal => self.failed_terminal,
        }
    }

    pub(crate) fn set(&mut self, status: FileStatus, count: u64) {
        match status {
            FileStatus::Pending => self.pending = count,
            FileStatus::Processing => self.processing = count,
            FileStatus::Success => self.success = count,
            FileStatus::FailedTerminal => self.failed_terminal = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.success + self.failed_terminal
    }
}

/// Aggregate statistics over a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Start of the window (Unix millis)
    pub since: i64,
    /// Files whose record changed inside the window, by status
    pub by_status: StatusCounts,
    /// Mean cycle duration over terminal records in the window
    pub average_duration_ms: Option<f64>,
    /// OperationRecords started inside the window
    pub attempts: u64,
    pub failed_attempts: u64,
}

impl ProcessingStats {
    /// Share of terminal files that succeeded, `None` with no terminal files
    pub fn success_rate(&self) -> Option<f64> {
        let terminal = self.by_status.success + self.by_status.failed_terminal;
        if terminal == 0 {
            None
        } else {
            Some(self.by_status.success as f64 / terminal as f64)
        }
    }
}

/// Rows removed by a retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub files_removed: u64,
    pub operations_removed: u64,
    pub metrics_removed: u64,
}
