//! Retry policy for signed-URL allocation.
//!
//! The allocation request is small and idempotent, so server and network
//! failures are retried a couple of times with exponential backoff before the
//! item is marked failed. The file transfer itself is never retried here; a
//! failed transfer waits for a manual or back-online retry.

use std::time::Duration;

use crate::error::UploadError;

/// Error classification for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Rejected request (most 4xx, bad config, cancellation). Never retried.
    Client,
    /// 5xx, 408 and 429
    Server,
    /// No response at all: connection refused, reset, timed out
    Network,
}

impl ErrorType {
    pub fn is_retryable(self) -> bool {
        self != ErrorType::Client
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    /// Retries after the first request
    pub max_retries: u32,
    /// Backoff before retry `n` is `base^(n + 1)` seconds
    pub base_delay_seconds: u64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_seconds: 2,
        }
    }
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay_seconds: u64) -> Self {
        Self {
            max_retries,
            base_delay_seconds,
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn should_retry(&self, retry_count: u32, error_type: ErrorType) -> bool {
        error_type.is_retryable() && retry_count < self.max_retries
    }

    /// 2s, 4s, 8s for the default base
    pub fn backoff(&self, retry_count: u32) -> Duration {
        Duration::from_secs(self.base_delay_seconds.saturating_pow(retry_count + 1))
    }
}

fn classify_status(status: u16) -> ErrorType {
    match status {
        408 | 429 => ErrorType::Server,
        400..=499 => ErrorType::Client,
        500..=599 => ErrorType::Server,
        _ => ErrorType::Network,
    }
}

/// Decide whether a failed allocation is worth repeating
pub fn classify_upload_error(error: &UploadError) -> ErrorType {
    if let Some(status) = error.status() {
        return classify_status(status);
    }
    match error {
        UploadError::Transport { .. } | UploadError::Http(_) | UploadError::Io(_) => {
            ErrorType::Network
        }
        _ => ErrorType::Client,
    }
}
