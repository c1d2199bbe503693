use crate::config::UploadPolicyConfig;
use crate::uploads::{MediaKind, SourceFile};

/// Result of checking one file against the upload policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid(MediaKind),
    Invalid { reason: String },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Validation::Valid(_) => None,
            Validation::Invalid { reason } => Some(reason),
        }
    }
}

/// Accepted content types and per-kind size ceilings
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    accepted_types: Vec<String>,
    image_max_bytes: u64,
    pdf_max_bytes: u64,
    video_max_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&UploadPolicyConfig::default())
    }
}

impl UploadPolicy {
    pub fn from_config(config: &UploadPolicyConfig) -> Self {
        Self {
            accepted_types: config
                .accepted_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
            image_max_bytes: config.image_max_bytes,
            pdf_max_bytes: config.pdf_max_bytes,
            video_max_bytes: config.video_max_bytes,
        }
    }

    pub fn max_bytes_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.image_max_bytes,
            MediaKind::Pdf => self.pdf_max_bytes,
            MediaKind::Video => self.video_max_bytes,
        }
    }

    fn accepts(&self, content_type: &str) -> bool {
        self.accepted_types.iter().any(|accepted| {
            match accepted.strip_suffix("/*") {
                Some(prefix) => content_type
                    .split_once('/')
                    .is_some_and(|(major, _)| major == prefix),
                None => accepted == content_type,
            }
        })
    }

    /// Check type and size. Never panics; the reason names the file.
    pub fn validate(&self, file: &SourceFile) -> Validation {
        let content_type = file.content_type.trim().to_ascii_lowercase();

        // Anything outside image/*, application/pdf, video/* is refused even if
        // the configured list is looser
        let Some(kind) = MediaKind::from_content_type(&content_type) else {
            return Validation::Invalid {
                reason: format!(
                    "{}: unsupported file type {} (images, PDFs and videos only)",
                    file.name,
                    display_type(&content_type)
                ),
            };
        };

        if !self.accepts(&content_type) {
            return Validation::Invalid {
                reason: format!(
                    "{}: file type {} is not accepted",
                    file.name,
                    display_type(&content_type)
                ),
            };
        }

        let size = file.size();
        if size == 0 {
            return Validation::Invalid {
                reason: format!("{}: file is empty", file.name),
            };
        }

        let max = self.max_bytes_for(kind);
        if size > max {
            return Validation::Invalid {
                reason: format!(
                    "{}: file is too large ({}, max {} for {} files)",
                    file.name,
                    format_size(size),
                    format_size(max),
                    kind.as_str()
                ),
            };
        }

        Validation::Valid(kind)
    }
}

fn display_type(content_type: &str) -> &str {
    if content_type.is_empty() {
        "unknown"
    } else {
        content_type
    }
}

/// Human-readable byte size (B, KB, MB)
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1}MB", b / MB)
    } else if b >= KB {
        format!("{:.1}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}
