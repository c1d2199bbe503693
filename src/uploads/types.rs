//! Type definitions for the upload pipeline.
//!
//! Defines the media descriptors, the per-file UploadItem, aggregate counts,
//! and the pipeline constants.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ErrorContext, UploadError};
use crate::preview::PreviewRef;

// Compression owns the first third of an image item's progress bar
pub const COMPRESSION_PROGRESS_SHARE: u8 = 33;

// Minimum spacing between speed samples (seconds)
pub const SPEED_SAMPLE_INTERVAL_SECS: f64 = 0.5;

// Weight of the newest speed sample in the exponential moving average
pub const SPEED_SMOOTHING_FACTOR: f64 = 0.3;

// Videos above this size get a "this may take a while" warning
pub const LARGE_VIDEO_WARNING_BYTES: u64 = 50 * 1024 * 1024;

pub const MIN_TITLE_CHARS: usize = 3;
pub const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Pdf,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let normalized = content_type.trim().to_ascii_lowercase();
        if normalized.starts_with("image/") {
            Some(MediaKind::Image)
        } else if normalized.starts_with("video/") {
            Some(MediaKind::Video)
        } else if normalized == "application/pdf" {
            Some(MediaKind::Pdf)
        } else {
            None
        }
    }

    /// Only images go through the compression stage
    pub fn needs_compression(&self) -> bool {
        matches!(self, MediaKind::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Pdf => "pdf",
        }
    }
}

/// A document category such as "Survey Plan"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaType {
    pub key: String,
    pub kind: MediaKind,
    pub title: String,
}

impl MediaType {
    pub fn new(key: &str, kind: MediaKind, title: &str) -> Self {
        Self {
            key: key.to_string(),
            kind,
            title: title.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(rename = "type")]
    pub media_type: Option<MediaType>,
    pub title: String,
    pub description: String,
    pub url: Option<String>,
}

/// Raw file handed to the pipeline
#[derive(Clone)]
pub struct SourceFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, guessing its content type from the extension
    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::Validation(format!("Invalid file name: {}", path.display())))?
            .to_string();

        let data = tokio::fs::read(path)
            .await
            .context(&format!("Failed to read {}", path.display()))?;
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(name, content_type, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_content_type(&self.content_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Idle,
    Compressing,
    Uploading,
    Done,
    Error,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Compressing => "compressing",
            UploadState::Uploading => "uploading",
            UploadState::Done => "done",
            UploadState::Error => "error",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, UploadState::Compressing | UploadState::Uploading)
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub id: String,
    #[serde(skip)]
    pub file: Option<SourceFile>,
    pub preview: Option<PreviewRef>,
    pub filename: String,
    pub content_type: String,
    pub kind: MediaKind,
    pub size: u64,
    pub status: UploadState,
    pub progress: u8,
    pub error: Option<String>,
    pub uploaded_url: Option<String>,
    pub metadata: MediaMetadata,
    /// Smoothed bytes per second
    pub upload_speed: Option<f64>,
    /// Seconds
    pub estimated_time_remaining: Option<f64>,
    pub attempt: u32,
    pub added_at: DateTime<Utc>,
}

impl UploadItem {
    /// Create an idle item for an already validated file
    pub fn new(file: SourceFile, kind: MediaKind, preview: Option<PreviewRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: file.name.clone(),
            content_type: file.content_type.clone(),
            size: file.size(),
            file: Some(file),
            preview,
            kind,
            status: UploadState::Idle,
            progress: 0,
            error: None,
            uploaded_url: None,
            metadata: MediaMetadata::default(),
            upload_speed: None,
            estimated_time_remaining: None,
            attempt: 0,
            added_at: Utc::now(),
        }
    }

    /// Consumer-facing view of the item
    pub fn to_media_item(&self) -> MediaItem {
        MediaItem {
            id: self.id.clone(),
            filename: self.filename.clone(),
            kind: self.kind,
            size: self.size,
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            url: self.uploaded_url.clone(),
            preview: self.preview.clone(),
            metadata: self.metadata.clone(),
            upload_speed: self.upload_speed,
            estimated_time_remaining: self.estimated_time_remaining,
        }
    }
}

/// The list shape handed to the owning form field
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub filename: String,
    pub kind: MediaKind,
    pub size: u64,
    pub status: UploadState,
    pub progress: u8,
    pub error: Option<String>,
    pub url: Option<String>,
    pub preview: Option<PreviewRef>,
    pub metadata: MediaMetadata,
    pub upload_speed: Option<f64>,
    pub estimated_time_remaining: Option<f64>,
}

/// A completed upload ready for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedMedia {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub title: String,
    pub description: String,
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCounts {
    pub idle: usize,
    pub compressing: usize,
    pub uploading: usize,
    pub done: usize,
    pub error: usize,
}

impl UploadCounts {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a UploadItem>) -> Self {
        let mut counts = UploadCounts::default();
        for item in items {
            match item.status {
                UploadState::Idle => counts.idle += 1,
                UploadState::Compressing => counts.compressing += 1,
                UploadState::Uploading => counts.uploading += 1,
                UploadState::Done => counts.done += 1,
                UploadState::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn in_flight(&self) -> usize {
        self.compressing + self.uploading
    }

    /// Items that still block submission because they are not finished
    pub fn pending(&self) -> usize {
        self.idle + self.compressing + self.uploading
    }

    pub fn total(&self) -> usize {
        self.idle + self.compressing + self.uploading + self.done + self.error
    }
}

/// Per-file rejection produced at admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    pub filename: String,
    pub reason: String,
}

/// Outcome of `UploadManager::add_files`
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdmissionReport {
    pub admitted: Vec<String>,
    pub rejected: Vec<RejectedFile>,
}

impl AdmissionReport {
    /// One message covering every rejected file, if any were rejected
    pub fn validation_message(&self) -> Option<String> {
        if self.rejected.is_empty() {
            return None;
        }
        let reasons: Vec<&str> = self.rejected.iter().map(|r| r.reason.as_str()).collect();
        Some(format!(
            "{} file(s) could not be added: {}",
            self.rejected.len(),
            reasons.join("; ")
        ))
    }
}
