use thiserror::Error;

/// VerifyDesk upload pipeline errors
#[derive(Debug, Error)]
pub enum UploadError {
    /// File rejected by the upload policy (type, size)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Batch would exceed the session's file ceiling
    #[error("You can upload at most {max} files ({current} already added, {incoming} selected)")]
    TooManyFiles {
        max: usize,
        current: usize,
        incoming: usize,
    },

    /// Image compression failed
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Network failure or non-2xx response from the upload destination
    #[error("Upload failed: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// Signed upload URL expired and could not be renewed
    #[error("Upload URL expired: {0}")]
    UrlExpired(String),

    /// Upload aborted by the user or the manager
    #[error("Upload cancelled")]
    Cancelled,

    /// State machine refused a transition
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// No item with that id in the session
    #[error("Upload item not found: {0}")]
    ItemNotFound(String),

    /// Metadata (type, title) rejected
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Submission gate did not pass
    #[error("Submission blocked: {}", .0.join("; "))]
    SubmissionBlocked(Vec<String>),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl UploadError {
    pub fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        UploadError::Transport {
            message: message.into(),
            status,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Transport { status, .. } => *status,
            UploadError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

/// Convert UploadError to String for callers that surface plain messages
impl From<UploadError> for String {
    fn from(err: UploadError) -> String {
        err.to_string()
    }
}

/// Helper to convert Box<dyn std::error::Error> to UploadError
impl From<Box<dyn std::error::Error>> for UploadError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        UploadError::Other(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, UploadError>;
}

impl<T, E: Into<UploadError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, UploadError> {
        self.map_err(|e| {
            let err: UploadError = e.into();
            match err {
                UploadError::Other(s) => UploadError::Other(format!("{}: {}", msg, s)),
                UploadError::Config(s) => UploadError::Config(format!("{}: {}", msg, s)),
                UploadError::Validation(s) => UploadError::Validation(format!("{}: {}", msg, s)),
                UploadError::Compression(s) => {
                    UploadError::Compression(format!("{}: {}", msg, s))
                }
                UploadError::Transport { message, status } => UploadError::Transport {
                    message: format!("{}: {}", msg, message),
                    status,
                },
                UploadError::Metadata(s) => UploadError::Metadata(format!("{}: {}", msg, s)),
                UploadError::Io(e) => {
                    UploadError::Io(std::io::Error::new(e.kind(), format!("{}: {}", msg, e)))
                }
                UploadError::LockPoisoned(s) => {
                    UploadError::LockPoisoned(format!("{}: {}", msg, s))
                }
                other => other,
            }
        })
    }
}
