use crate::uploads::{MediaKind, UploadState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequence number for ordering events
pub type EventSequence = u64;

/// Every mutation of an upload session is published as one of these
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub payload: UploadEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEventPayload {
    /// File admitted into the session
    ItemAdded {
        item_id: String,
        filename: String,
        kind: MediaKind,
        size: u64,
    },

    /// File refused by the upload policy
    ItemRejected { filename: String, reason: String },

    /// Whole batch refused (file ceiling)
    BatchRejected { message: String },

    /// Lifecycle transition
    StatusChanged {
        item_id: String,
        status: UploadState,
        progress: u8,
        error: Option<String>,
    },

    /// Progress tick
    Progress {
        item_id: String,
        progress: u8,
        upload_speed: Option<f64>,
        estimated_time_remaining: Option<f64>,
    },

    /// Server already had the file; its existing URL was used
    DuplicateResolved { item_id: String, url: String },

    /// Signed URL expired mid-upload and was renewed
    UrlRenewed { item_id: String },

    MetadataUpdated { item_id: String },

    ItemRemoved { item_id: String },

    /// Large video: expect a long upload
    LargeUploadWarning {
        item_id: String,
        filename: String,
        size: u64,
    },

    NetworkOffline,

    NetworkOnline { retried: usize },

    Submitted { count: usize },

    SessionDisposed { released_previews: usize },
}

impl UploadEvent {
    pub fn item_id(&self) -> Option<&str> {
        match &self.payload {
            UploadEventPayload::ItemAdded { item_id, .. }
            | UploadEventPayload::StatusChanged { item_id, .. }
            | UploadEventPayload::Progress { item_id, .. }
            | UploadEventPayload::DuplicateResolved { item_id, .. }
            | UploadEventPayload::UrlRenewed { item_id }
            | UploadEventPayload::MetadataUpdated { item_id }
            | UploadEventPayload::ItemRemoved { item_id }
            | UploadEventPayload::LargeUploadWarning { item_id, .. } => Some(item_id),
            _ => None,
        }
    }

    pub fn payload_type(&self) -> &'static str {
        match &self.payload {
            UploadEventPayload::ItemAdded { .. } => "item_added",
            UploadEventPayload::ItemRejected { .. } => "item_rejected",
            UploadEventPayload::BatchRejected { .. } => "batch_rejected",
            UploadEventPayload::StatusChanged { .. } => "status_changed",
            UploadEventPayload::Progress { .. } => "progress",
            UploadEventPayload::DuplicateResolved { .. } => "duplicate_resolved",
            UploadEventPayload::UrlRenewed { .. } => "url_renewed",
            UploadEventPayload::MetadataUpdated { .. } => "metadata_updated",
            UploadEventPayload::ItemRemoved { .. } => "item_removed",
            UploadEventPayload::LargeUploadWarning { .. } => "large_upload_warning",
            UploadEventPayload::NetworkOffline => "network_offline",
            UploadEventPayload::NetworkOnline { .. } => "network_online",
            UploadEventPayload::Submitted { .. } => "submitted",
            UploadEventPayload::SessionDisposed { .. } => "session_disposed",
        }
    }
}
