//! Byte transfer to a signed upload destination.
//!
//! The body is streamed in fixed-size chunks so progress can be reported and
//! cancellation observed between chunks. An expired destination is renewed
//! through the caller's `UrlRenewer` and the body resent, up to
//! `MAX_URL_RENEWALS` times per attempt.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::signed_url::SignedUpload;
use crate::error::UploadError;
use crate::logging::log_warn;

pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;
pub const MAX_URL_RENEWALS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
    pub percent: u8,
}

impl TransferProgress {
    pub fn new(loaded: u64, total: u64) -> Self {
        let loaded = loaded.min(total);
        let percent = if total == 0 {
            100
        } else {
            (loaded * 100 / total) as u8
        };
        Self {
            loaded,
            total,
            percent,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Supplies a fresh destination when the current one has expired
#[async_trait]
pub trait UrlRenewer: Send + Sync {
    async fn renew(&self) -> Result<SignedUpload, UploadError>;
}

pub struct TransportHooks {
    pub cancel: CancellationToken,
    pub on_progress: ProgressCallback,
    pub renewer: Arc<dyn UrlRenewer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    Uploaded(String),
    /// The server already had this file (409); the URL is the existing copy
    Duplicate(String),
}

impl TransportOutcome {
    pub fn url(&self) -> &str {
        match self {
            TransportOutcome::Uploaded(url) | TransportOutcome::Duplicate(url) => url,
        }
    }

    pub fn into_url(self) -> String {
        match self {
            TransportOutcome::Uploaded(url) | TransportOutcome::Duplicate(url) => url,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, TransportOutcome::Duplicate(_))
    }
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        body: Bytes,
        content_type: &str,
        target: SignedUpload,
        hooks: TransportHooks,
    ) -> Result<TransportOutcome, UploadError>;
}

/// Forwards progress only when it moves past the furthest point reported so
/// far, so a resend after renewal never shows the bar going backwards.
#[derive(Clone)]
pub struct HighWaterProgress {
    reported: Arc<AtomicU64>,
    callback: ProgressCallback,
}

impl HighWaterProgress {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            reported: Arc::new(AtomicU64::new(0)),
            callback,
        }
    }

    pub fn report(&self, loaded: u64, total: u64) {
        let previous = self.reported.fetch_max(loaded, Ordering::SeqCst);
        if loaded > previous || (loaded == 0 && total == 0) {
            (self.callback)(TransferProgress::new(loaded, total));
        }
    }
}

enum SendResult {
    Finished(TransportOutcome),
    Expired(String),
}

/// reqwest PUT with a chunked streaming body
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new() -> Result<Self, UploadError> {
        // No request timeout: large videos legitimately take a long time
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            chunk_size: UPLOAD_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn send_once(
        &self,
        body: &Bytes,
        content_type: &str,
        target: &SignedUpload,
        cancel: &CancellationToken,
        progress: &HighWaterProgress,
    ) -> Result<SendResult, UploadError> {
        let total = body.len() as u64;
        let chunks: Vec<Bytes> = (0..body.len())
            .step_by(self.chunk_size)
            .map(|start| body.slice(start..(start + self.chunk_size).min(body.len())))
            .collect();

        let stream_cancel = cancel.clone();
        let stream_progress = progress.clone();
        let mut loaded = 0u64;
        let stream = futures::stream::iter(chunks).map(move |chunk| {
            if stream_cancel.is_cancelled() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "upload cancelled",
                ));
            }
            loaded += chunk.len() as u64;
            stream_progress.report(loaded, total);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let request = self
            .client
            .put(&target.upload_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream));

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = request.send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(_) if cancel.is_cancelled() => return Err(UploadError::Cancelled),
            Err(e) => {
                return Err(UploadError::transport(format!("Upload request failed: {}", e), None))
            }
        };

        let status = response.status();
        if status.is_success() {
            progress.report(total, total);
            return Ok(SendResult::Finished(TransportOutcome::Uploaded(
                target.public_url.clone(),
            )));
        }

        let error_text = response.text().await.unwrap_or_default();

        if status == StatusCode::CONFLICT {
            progress.report(total, total);
            let url = existing_url_from_body(&error_text).unwrap_or_else(|| target.public_url.clone());
            return Ok(SendResult::Finished(TransportOutcome::Duplicate(url)));
        }

        if is_expiry(status, &error_text) {
            return Ok(SendResult::Expired(format!(
                "status {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        Err(UploadError::transport(
            format!("Upload failed with status {}: {}", status.as_u16(), error_text),
            Some(status.as_u16()),
        ))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(
        &self,
        body: Bytes,
        content_type: &str,
        target: SignedUpload,
        hooks: TransportHooks,
    ) -> Result<TransportOutcome, UploadError> {
        let progress = HighWaterProgress::new(hooks.on_progress.clone());
        let mut target = target;
        let mut renewals = 0u32;

        loop {
            if hooks.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            match self
                .send_once(&body, content_type, &target, &hooks.cancel, &progress)
                .await?
            {
                SendResult::Finished(outcome) => return Ok(outcome),
                SendResult::Expired(detail) => {
                    if renewals >= MAX_URL_RENEWALS {
                        return Err(UploadError::UrlExpired(format!(
                            "gave up after {} renewals ({})",
                            renewals, detail
                        )));
                    }
                    renewals += 1;
                    log_warn(
                        "upload-queue",
                        &format!("Upload URL expired ({}), renewing ({}/{})", detail, renewals, MAX_URL_RENEWALS),
                    )
                    .unwrap_or_default();

                    target = tokio::select! {
                        _ = hooks.cancel.cancelled() => return Err(UploadError::Cancelled),
                        renewed = hooks.renewer.renew() => renewed?,
                    };
                }
            }
        }
    }
}

/// 410 Gone, or 403 whose body says the signature expired
pub fn is_expiry(status: StatusCode, body: &str) -> bool {
    status == StatusCode::GONE
        || (status == StatusCode::FORBIDDEN && body.to_ascii_lowercase().contains("expired"))
}

fn existing_url_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["url", "existingUrl"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .find(|url| !url.trim().is_empty())
        .map(|url| url.to_string())
}
