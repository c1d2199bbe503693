//! Signed upload URL allocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::retry::{classify_upload_error, RetryStrategy};
use crate::config::UploaderConfig;
use crate::error::UploadError;
use crate::logging::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlRequest {
    pub filename: String,
    pub content_type: String,
    pub folder: String,
}

/// Short-lived upload destination plus the URL the file will be served from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUpload {
    #[serde(alias = "signedUrl")]
    pub upload_url: String,
    #[serde(alias = "fileUrl")]
    pub public_url: String,
}

/// Allocates signed upload destinations. May be called more than once per
/// item (initial request and renewal after expiry).
#[async_trait]
pub trait SignedUrlClient: Send + Sync {
    async fn request_signed_url(&self, request: &SignedUrlRequest)
        -> Result<SignedUpload, UploadError>;
}

/// `POST {server}/api/uploads/signed-url` with bearer auth
#[derive(Debug, Clone)]
pub struct HttpSignedUrlClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    retry: RetryStrategy,
}

impl HttpSignedUrlClient {
    pub fn new(server_url: &str, api_key: &str) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/uploads/signed-url", server_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            retry: RetryStrategy::default(),
        })
    }

    pub fn from_config(config: &UploaderConfig) -> Result<Self, UploadError> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| UploadError::Config("No API key configured".to_string()))?;
        let server_url = config
            .server_url
            .as_deref()
            .ok_or_else(|| UploadError::Config("No server URL configured".to_string()))?;
        Self::new(server_url, api_key)
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_once(&self, request: &SignedUrlRequest) -> Result<SignedUpload, UploadError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| UploadError::transport(format!("Failed to request upload URL: {}", e), None))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(UploadError::transport(
                format!(
                    "Upload URL request failed with status {}: {}",
                    status.as_u16(),
                    error_text
                ),
                Some(status.as_u16()),
            ));
        }

        let signed: SignedUpload = response
            .json()
            .await
            .map_err(|e| UploadError::transport(format!("Failed to parse upload URL response: {}", e), None))?;

        if signed.upload_url.trim().is_empty() {
            return Err(UploadError::transport("Server returned an empty upload URL", None));
        }
        Ok(signed)
    }
}

#[async_trait]
impl SignedUrlClient for HttpSignedUrlClient {
    async fn request_signed_url(
        &self,
        request: &SignedUrlRequest,
    ) -> Result<SignedUpload, UploadError> {
        let mut retry_count = 0;
        loop {
            match self.request_once(request).await {
                Ok(signed) => return Ok(signed),
                Err(e) => {
                    let error_type = classify_upload_error(&e);
                    if !self.retry.should_retry(retry_count, error_type) {
                        return Err(e);
                    }
                    let delay = self.retry.backoff(retry_count);
                    log_warn(
                        "upload-queue",
                        &format!(
                            "Upload URL request for {} failed ({}), retrying in {}s",
                            request.filename,
                            e,
                            delay.as_secs()
                        ),
                    )
                    .unwrap_or_default();
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    log_info(
                        "upload-queue",
                        &format!("Retry {} for upload URL of {}", retry_count, request.filename),
                    )
                    .unwrap_or_default();
                }
            }
        }
    }
}
