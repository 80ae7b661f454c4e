//! # Retry Controller
//!
//! Runs one operation (convert or deliver) under a [`RetryPolicy`].
//!
//! ## Overview
//!
//! - Every attempt, failed or not, produces exactly one [`OperationRecord`]
//!   handed to an [`AttemptRecorder`] before the next attempt starts.
//! - Terminal errors stop immediately; retryable ones back off with jitter
//!   until the policy is exhausted.
//! - A recorder failure aborts the run with [`SyncError::Storage`]: an
//!   attempt that could not be recorded must not be followed by another.
//! - Cancelling the shutdown token interrupts a backoff wait. The attempt
//!   currently running is never interrupted from here.

use async_trait::async_trait;
use core_runtime::RetryPolicy;
use core_store::{now_millis, OperationRecord, OperationType};
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AttemptError, Result, SyncError};

/// Sink for per-attempt history
#[async_trait]
pub trait AttemptRecorder: Send + Sync {
    /// Persist one attempt. `will_retry` tells whether another attempt follows.
    async fn record(&self, operation: &OperationRecord, will_retry: bool) -> core_store::Result<()>;
}

/// Final result of a retried operation
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Failed { error: AttemptError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self { policy, shutdown }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt_fn` until it succeeds, fails terminally or runs out of attempts
    ///
    /// `attempt_fn` receives the 1-based attempt number. A successful value
    /// is serialized into the operation record's metadata.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Storage`] if an attempt could not be recorded
    /// - [`SyncError::ShuttingDown`] if shutdown interrupted a backoff wait
    pub async fn run<T, F, Fut>(
        &self,
        operation: OperationType,
        recorder: &dyn AttemptRecorder,
        mut attempt_fn: F,
    ) -> Result<RetryOutcome<T>>
    where
        T: Serialize + Send,
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, AttemptError>> + Send,
    {
        let mut attempt = 1;

        loop {
            let started_at = now_millis();

            let error = match attempt_fn(attempt).await {
                Ok(value) => {
                    let metadata = serde_json::to_value(&value).unwrap_or(serde_json::Value::Null);
                    let record = OperationRecord::succeeded(operation, attempt, started_at)
                        .with_metadata(metadata);
                    recorder.record(&record, false).await?;
                    return Ok(RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            let will_retry = error.is_retryable() && self.policy.allows_retry_after(attempt);
            let record = OperationRecord::failed(
                operation,
                attempt,
                started_at,
                error.error_class(),
                error.to_string(),
            )
            .with_metadata(serde_json::json!({ "will_retry": will_retry }));
            recorder.record(&record, will_retry).await?;

            if !will_retry {
                if error.is_retryable() {
                    warn!(
                        operation = %operation,
                        attempts = attempt,
                        error = %error,
                        "Retry budget exhausted"
                    );
                }
                return Ok(RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.policy.delay_for(attempt);
            debug!(
                operation = %operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Backing off before next attempt"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(SyncError::ShuttingDown),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
