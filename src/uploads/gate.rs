//! Submission readiness and metadata rules.

use serde::Serialize;

use super::types::{
    FinalizedMedia, MediaMetadata, MediaType, UploadCounts, UploadItem, UploadState,
    MAX_TITLE_CHARS, MIN_TITLE_CHARS,
};
use crate::error::UploadError;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub counts: UploadCounts,
    /// Human-readable reasons submission is not allowed yet, in rule order
    pub blocking: Vec<String>,
    pub missing_types: Vec<MediaType>,
}

impl GateReport {
    pub fn is_ready(&self) -> bool {
        self.blocking.is_empty()
    }
}

fn title_chars(title: &str) -> usize {
    title.trim().chars().count()
}

fn has_complete_metadata(item: &UploadItem) -> bool {
    item.metadata.media_type.is_some() && title_chars(&item.metadata.title) >= MIN_TITLE_CHARS
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Check every submission rule against the current items. Never mutates them.
pub fn evaluate(items: &[UploadItem], required_types: &[MediaType]) -> GateReport {
    let counts = UploadCounts::from_items(items);
    let mut blocking = Vec::new();

    if items.is_empty() {
        blocking.push("Add at least one file".to_string());
    }

    let pending = counts.pending();
    if pending > 0 {
        blocking.push(format!(
            "{} file{} still uploading or waiting to upload",
            pending,
            plural(pending)
        ));
    }

    if counts.error > 0 {
        blocking.push(format!(
            "{} file{} failed to upload; retry or remove {}",
            counts.error,
            plural(counts.error),
            if counts.error == 1 { "it" } else { "them" }
        ));
    }

    let incomplete = items.iter().filter(|i| !has_complete_metadata(i)).count();
    if incomplete > 0 {
        blocking.push(format!(
            "{} file{} missing a document type or a title of at least {} characters",
            incomplete,
            plural(incomplete),
            MIN_TITLE_CHARS
        ));
    }

    let missing_types: Vec<MediaType> = required_types
        .iter()
        .filter(|required| {
            !items.iter().any(|item| {
                item.status == UploadState::Done
                    && item
                        .metadata
                        .media_type
                        .as_ref()
                        .is_some_and(|t| t.key == required.key)
            })
        })
        .cloned()
        .collect();

    if !missing_types.is_empty() {
        let titles: Vec<&str> = missing_types.iter().map(|t| t.title.as_str()).collect();
        blocking.push(format!("Missing required documents: {}", titles.join(", ")));
    }

    GateReport {
        counts,
        blocking,
        missing_types,
    }
}

/// Title length and type membership
pub fn validate_metadata(
    metadata: &MediaMetadata,
    allowed_types: &[MediaType],
) -> Result<(), UploadError> {
    let title_len = title_chars(&metadata.title);
    // An empty title is allowed while editing; the gate catches it at submit
    if title_len > 0 && title_len < MIN_TITLE_CHARS {
        return Err(UploadError::Metadata(format!(
            "Title must be at least {} characters",
            MIN_TITLE_CHARS
        )));
    }
    if title_len > MAX_TITLE_CHARS {
        return Err(UploadError::Metadata(format!(
            "Title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }

    if let Some(media_type) = &metadata.media_type {
        if !allowed_types.iter().any(|t| t.key == media_type.key) {
            return Err(UploadError::Metadata(format!(
                "Document type '{}' is not allowed here",
                media_type.title
            )));
        }
    }
    Ok(())
}

/// Done items as the list handed to the submitter
pub fn finalize(items: &[UploadItem]) -> Vec<FinalizedMedia> {
    items
        .iter()
        .filter(|item| item.status == UploadState::Done)
        .filter_map(|item| {
            Some(FinalizedMedia {
                media_type: item.metadata.media_type.clone()?,
                title: item.metadata.title.trim().to_string(),
                description: item.metadata.description.trim().to_string(),
                url: item.uploaded_url.clone()?,
                filename: item.filename.clone(),
            })
        })
        .collect()
}
