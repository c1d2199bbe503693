//! Upload boundary: signed URL allocation and byte transfer.
//!
//! - `signed_url`: `SignedUrlClient` trait and the HTTP client
//! - `transport`: `UploadTransport` trait and the streaming PUT transport
//! - `retry`: error classification and backoff for the allocation request

pub mod retry;
pub mod signed_url;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_server;

pub use retry::{classify_upload_error, ErrorType, RetryStrategy};
pub use signed_url::{HttpSignedUrlClient, SignedUpload, SignedUrlClient, SignedUrlRequest};
pub use transport::{
    HighWaterProgress, HttpTransport, ProgressCallback, TransferProgress, TransportHooks,
    TransportOutcome, UploadTransport, UrlRenewer, MAX_URL_RENEWALS, UPLOAD_CHUNK_SIZE,
};
