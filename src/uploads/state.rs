//! Per-item lifecycle: idle → compressing → uploading → done | error.
//!
//! Every transition is a method on `UploadItem` that either applies the whole
//! change or refuses it with `InvalidTransition`, leaving the item untouched.

use super::speed::SpeedEstimate;
use super::types::{UploadItem, UploadState, COMPRESSION_PROGRESS_SHARE};
use crate::error::UploadError;

const DEFAULT_FAILURE_MESSAGE: &str = "Upload failed";

fn invalid(from: UploadState, to: UploadState) -> UploadError {
    UploadError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

impl UploadItem {
    /// Start a new attempt from `idle` (first run, or after cancel) or `error` (retry).
    ///
    /// Images enter `compressing`, everything else goes straight to `uploading`.
    /// Progress, error and speed readings are reset. Returns the new attempt number.
    pub fn begin_attempt(&mut self) -> Result<u32, UploadError> {
        let next = if self.kind.needs_compression() {
            UploadState::Compressing
        } else {
            UploadState::Uploading
        };

        if !matches!(self.status, UploadState::Idle | UploadState::Error) {
            return Err(invalid(self.status, next));
        }
        if self.file.is_none() {
            return Err(UploadError::Other(format!(
                "{}: source file is no longer available, remove and add it again",
                self.filename
            )));
        }

        self.status = next;
        self.progress = 0;
        self.error = None;
        self.uploaded_url = None;
        self.upload_speed = None;
        self.estimated_time_remaining = None;
        self.attempt += 1;
        Ok(self.attempt)
    }

    /// Compression engine progress (0-100) mapped into the first third of the bar
    pub fn set_compression_progress(&mut self, percent: u8) -> Result<(), UploadError> {
        if self.status != UploadState::Compressing {
            return Err(invalid(self.status, UploadState::Compressing));
        }
        let mapped = (percent.min(100) as u16 * COMPRESSION_PROGRESS_SHARE as u16 / 100) as u8;
        self.progress = self.progress.max(mapped);
        Ok(())
    }

    pub fn finish_compression(&mut self) -> Result<(), UploadError> {
        if self.status != UploadState::Compressing {
            return Err(invalid(self.status, UploadState::Uploading));
        }
        self.status = UploadState::Uploading;
        self.progress = self.progress.max(COMPRESSION_PROGRESS_SHARE);
        Ok(())
    }

    /// Transfer progress. Images map into the range after compression's share.
    pub fn set_upload_progress(
        &mut self,
        loaded: u64,
        total: u64,
        estimate: Option<SpeedEstimate>,
    ) -> Result<(), UploadError> {
        if self.status != UploadState::Uploading {
            return Err(invalid(self.status, UploadState::Uploading));
        }

        let percent = if total == 0 {
            100
        } else {
            (loaded.min(total) * 100 / total) as u16
        };
        let base = if self.kind.needs_compression() {
            COMPRESSION_PROGRESS_SHARE as u16
        } else {
            0
        };
        let mapped = (base + percent * (100 - base) / 100) as u8;
        self.progress = self.progress.max(mapped);

        if let Some(estimate) = estimate {
            self.upload_speed = Some(estimate.bytes_per_second);
            self.estimated_time_remaining = estimate.seconds_remaining;
        }
        Ok(())
    }

    pub fn complete(&mut self, url: String) -> Result<(), UploadError> {
        if self.status != UploadState::Uploading {
            return Err(invalid(self.status, UploadState::Done));
        }
        if url.trim().is_empty() {
            return Err(UploadError::transport("Server returned an empty URL", None));
        }
        self.status = UploadState::Done;
        self.progress = 100;
        self.error = None;
        self.metadata.url = Some(url.clone());
        self.uploaded_url = Some(url);
        self.upload_speed = None;
        self.estimated_time_remaining = None;
        Ok(())
    }

    /// Move an in-flight item to `error`. An empty message is replaced so the
    /// item never sits in `error` without one.
    pub fn fail(&mut self, message: &str) -> Result<(), UploadError> {
        if !self.status.is_in_flight() {
            return Err(invalid(self.status, UploadState::Error));
        }
        let message = message.trim();
        self.status = UploadState::Error;
        self.error = Some(if message.is_empty() {
            DEFAULT_FAILURE_MESSAGE.to_string()
        } else {
            message.to_string()
        });
        self.upload_speed = None;
        self.estimated_time_remaining = None;
        Ok(())
    }

    /// An `idle` item whose pipeline could not be spawned. Lands in `error`
    /// so it shows up as failed and can be retried.
    pub fn refuse_start(&mut self, message: &str) -> Result<(), UploadError> {
        if self.status != UploadState::Idle {
            return Err(invalid(self.status, UploadState::Error));
        }
        let message = message.trim();
        self.status = UploadState::Error;
        self.progress = 0;
        self.error = Some(if message.is_empty() {
            DEFAULT_FAILURE_MESSAGE.to_string()
        } else {
            message.to_string()
        });
        Ok(())
    }

    /// Abort an in-flight item back to `idle`, no error
    pub fn cancel(&mut self) -> Result<(), UploadError> {
        if !self.status.is_in_flight() {
            return Err(invalid(self.status, UploadState::Idle));
        }
        self.status = UploadState::Idle;
        self.progress = 0;
        self.error = None;
        self.upload_speed = None;
        self.estimated_time_remaining = None;
        Ok(())
    }
}
