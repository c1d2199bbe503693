//! Per-item upload pipelines.
//!
//! Each admitted or retried item gets its own task: compress (images), request
//! a signed URL, transfer. The task never holds the session lock across an
//! await; every state change re-locks, checks the item is still on the same
//! attempt, and replaces the item with an updated copy. Updates for a stale
//! attempt are dropped, which is what makes cancel and remove take effect
//! immediately from the caller's point of view.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::compression::{CompressionProgress, Compressor};
use super::speed::SpeedTracker;
use super::types::{SourceFile, UploadItem, UploadState};
use super::upload::{
    SignedUpload, SignedUrlClient, SignedUrlRequest, TransferProgress, TransportHooks,
    UploadTransport, UrlRenewer,
};
use crate::error::UploadError;
use crate::events::{EventBus, UploadEventPayload};
use crate::logging::{log_debug, log_error, log_info};

/// Shared mutable state of one upload session
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub items: IndexMap<String, UploadItem>,
    /// One token per in-flight item
    pub tokens: HashMap<String, CancellationToken>,
    pub speeds: SpeedTracker,
}

impl Session {
    /// Abort an in-flight item and put it back to idle. Returns the updated
    /// item, or None when there was nothing in flight.
    pub fn cancel_item(&mut self, id: &str) -> Option<UploadItem> {
        if let Some(token) = self.tokens.remove(id) {
            token.cancel();
        }
        self.speeds.reset(id);

        let current = self.items.get(id)?;
        let mut updated = current.clone();
        updated.cancel().ok()?;
        self.items.insert(id.to_string(), updated.clone());
        Some(updated)
    }
}

#[derive(Clone)]
pub(crate) struct UploadProcessor {
    pub session: Arc<Mutex<Session>>,
    compressor: Arc<dyn Compressor>,
    signer: Arc<dyn SignedUrlClient>,
    transport: Arc<dyn UploadTransport>,
    events: EventBus,
    folder: String,
    settled: Arc<Notify>,
}

impl UploadProcessor {
    pub fn new(
        compressor: Arc<dyn Compressor>,
        signer: Arc<dyn SignedUrlClient>,
        transport: Arc<dyn UploadTransport>,
        events: EventBus,
        folder: String,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::default())),
            compressor,
            signer,
            transport,
            events,
            folder,
            settled: Arc::new(Notify::new()),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Session>, UploadError> {
        self.session
            .lock()
            .map_err(|e| UploadError::LockPoisoned(e.to_string()))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Wake anyone waiting for the session to settle
    pub fn notify_settled(&self) {
        self.settled.notify_waiters();
    }

    pub async fn wait_until_settled(&self) {
        loop {
            let notified = self.settled.notified();
            let in_flight = self
                .session
                .lock()
                .map(|s| s.items.values().any(|i| i.status.is_in_flight()))
                .unwrap_or(false);
            if !in_flight {
                return;
            }
            notified.await;
        }
    }

    /// Begin a new attempt for `id` and spawn its pipeline
    pub fn start(&self, id: &str) -> Result<(), UploadError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UploadError::Other(format!("No async runtime to run uploads on: {}", e)))?;

        let (item, file, token) = {
            let mut session = self.lock()?;
            let current = session
                .items
                .get(id)
                .ok_or_else(|| UploadError::ItemNotFound(id.to_string()))?;

            let mut updated = current.clone();
            updated.begin_attempt()?;
            let file = updated
                .file
                .clone()
                .ok_or_else(|| UploadError::Other(format!("{}: source file missing", updated.filename)))?;

            let token = CancellationToken::new();
            if let Some(previous) = session.tokens.insert(id.to_string(), token.clone()) {
                previous.cancel();
            }
            session.speeds.reset(id);
            session.items.insert(id.to_string(), updated.clone());
            (updated, file, token)
        };

        self.publish_status(&item);
        log_info(
            "upload-queue",
            &format!("📤 Starting upload of {} (attempt {})", item.filename, item.attempt),
        )
        .unwrap_or_default();

        let processor = self.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            let result = processor.execute(&id, item.attempt, file, &token).await;
            processor.finish(&id, item.attempt, result);
        });
        Ok(())
    }

    /// `start` for a freshly admitted item. If the pipeline cannot be spawned
    /// the item moves to `error` with the reason instead of sitting in `idle`.
    pub fn start_or_fail(&self, id: &str) -> Result<(), UploadError> {
        let err = match self.start(id) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        log_error("upload-queue", &format!("Failed to start upload {}: {}", id, err))
            .unwrap_or_default();

        let refused = {
            let mut session = self.lock()?;
            session.items.get(id).cloned().and_then(|current| {
                let mut updated = current;
                updated.refuse_start(&err.to_string()).ok()?;
                session.items.insert(id.to_string(), updated.clone());
                Some(updated)
            })
        };
        if let Some(item) = refused {
            self.publish_status(&item);
        }
        Err(err)
    }

    /// Retry every failed item that still holds its file. Returns how many restarted.
    pub fn retry_failed(&self) -> usize {
        let ids: Vec<String> = match self.lock() {
            Ok(session) => session
                .items
                .values()
                .filter(|i| i.status == UploadState::Error && i.file.is_some())
                .map(|i| i.id.clone())
                .collect(),
            Err(_) => return 0,
        };

        ids.iter()
            .filter(|id| match self.start(id) {
                Ok(()) => true,
                Err(e) => {
                    log_error("upload-queue", &format!("Failed to retry {}: {}", id, e))
                        .unwrap_or_default();
                    false
                }
            })
            .count()
    }

    async fn execute(
        &self,
        id: &str,
        attempt: u32,
        file: SourceFile,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let mut payload = file;

        if payload.kind().is_some_and(|k| k.needs_compression()) {
            if self.compressor.applies_to(&payload) {
                let progress = self.compression_progress(id, attempt);
                payload = tokio::select! {
                    _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    result = self.compressor.compress(&payload, progress) => result?,
                };
            }
            let item = self.apply(id, attempt, |item| item.finish_compression())?;
            self.publish_status(&item);
        }

        let request = SignedUrlRequest {
            filename: payload.name.clone(),
            content_type: payload.content_type.clone(),
            folder: self.folder.clone(),
        };
        let target = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.signer.request_signed_url(&request) => result?,
        };

        let hooks = TransportHooks {
            cancel: cancel.clone(),
            on_progress: self.upload_progress(id, attempt),
            renewer: Arc::new(PipelineRenewer {
                signer: self.signer.clone(),
                request,
                events: self.events.clone(),
                item_id: id.to_string(),
            }),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.transport.upload(payload.data.clone(), &payload.content_type, target, hooks) => result?,
        };

        if outcome.is_duplicate() {
            log_info(
                "upload-queue",
                &format!("⚡ {} already on server, using existing copy", payload.name),
            )
            .unwrap_or_default();
            self.events.publish(UploadEventPayload::DuplicateResolved {
                item_id: id.to_string(),
                url: outcome.url().to_string(),
            });
        }

        Ok(outcome.into_url())
    }

    /// Apply the pipeline result, unless the item moved on to another attempt
    fn finish(&self, id: &str, attempt: u32, result: Result<String, UploadError>) {
        let updated = {
            let Ok(mut session) = self.lock() else {
                return;
            };

            let Some(current) = session.items.get(id) else {
                // removed while in flight
                return;
            };
            if current.attempt != attempt || !current.status.is_in_flight() {
                log_debug(
                    "upload-queue",
                    &format!("Discarding result of stale attempt {} for {}", attempt, id),
                )
                .unwrap_or_default();
                return;
            }

            let mut updated = current.clone();
            let applied = match &result {
                Ok(url) => match updated.complete(url.clone()) {
                    Ok(()) => Ok(()),
                    Err(e) => updated.fail(&e.to_string()),
                },
                Err(UploadError::Cancelled) => updated.cancel(),
                Err(e) => updated.fail(&e.to_string()),
            };
            if applied.is_err() {
                return;
            }

            session.tokens.remove(id);
            session.speeds.reset(id);
            session.items.insert(id.to_string(), updated.clone());
            updated
        };

        match updated.status {
            UploadState::Done => log_info(
                "upload-queue",
                &format!("✅ Uploaded {}", updated.filename),
            ),
            UploadState::Error => log_error(
                "upload-queue",
                &format!(
                    "❌ Upload of {} failed: {}",
                    updated.filename,
                    updated.error.as_deref().unwrap_or_default()
                ),
            ),
            _ => log_info("upload-queue", &format!("Upload of {} stopped", updated.filename)),
        }
        .unwrap_or_default();

        self.publish_status(&updated);
        self.notify_settled();
    }

    /// Whole-item replacement guarded by the attempt check
    fn apply<F>(&self, id: &str, attempt: u32, change: F) -> Result<UploadItem, UploadError>
    where
        F: FnOnce(&mut UploadItem) -> Result<(), UploadError>,
    {
        let mut session = self.lock()?;
        let current = session
            .items
            .get(id)
            .filter(|i| i.attempt == attempt && i.status.is_in_flight())
            .ok_or(UploadError::Cancelled)?;

        let mut updated = current.clone();
        change(&mut updated)?;
        session.items.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    fn compression_progress(&self, id: &str, attempt: u32) -> CompressionProgress {
        let processor = self.clone();
        let id = id.to_string();
        Arc::new(move |percent| {
            let mut changed = false;
            let result = processor.apply(&id, attempt, |item| {
                let before = item.progress;
                item.set_compression_progress(percent)?;
                changed = item.progress != before;
                Ok(())
            });
            if let Ok(item) = result {
                if changed {
                    processor.publish_progress(&item);
                }
            }
        })
    }

    fn upload_progress(&self, id: &str, attempt: u32) -> Arc<dyn Fn(TransferProgress) + Send + Sync> {
        let processor = self.clone();
        let id = id.to_string();
        Arc::new(move |progress: TransferProgress| {
            let item = {
                let Ok(mut guard) = processor.lock() else {
                    return;
                };
                let session = &mut *guard;
                let Some(current) = session
                    .items
                    .get(&id)
                    .filter(|i| i.attempt == attempt && i.status == UploadState::Uploading)
                else {
                    return;
                };

                let mut updated = current.clone();
                let estimate = session
                    .speeds
                    .record(&id, progress.loaded, progress.total, Instant::now());
                if updated
                    .set_upload_progress(progress.loaded, progress.total, estimate)
                    .is_err()
                {
                    return;
                }
                let changed = updated.progress != current.progress
                    || updated.upload_speed != current.upload_speed;
                session.items.insert(id.clone(), updated.clone());
                changed.then_some(updated)
            };

            if let Some(item) = item {
                processor.publish_progress(&item);
            }
        })
    }

    pub fn publish_status(&self, item: &UploadItem) {
        self.events.publish(UploadEventPayload::StatusChanged {
            item_id: item.id.clone(),
            status: item.status,
            progress: item.progress,
            error: item.error.clone(),
        });
    }

    fn publish_progress(&self, item: &UploadItem) {
        self.events.publish(UploadEventPayload::Progress {
            item_id: item.id.clone(),
            progress: item.progress,
            upload_speed: item.upload_speed,
            estimated_time_remaining: item.estimated_time_remaining,
        });
    }
}

/// Re-requests a signed URL for the same file when the current one expires
struct PipelineRenewer {
    signer: Arc<dyn SignedUrlClient>,
    request: SignedUrlRequest,
    events: EventBus,
    item_id: String,
}

#[async_trait]
impl UrlRenewer for PipelineRenewer {
    async fn renew(&self) -> Result<SignedUpload, UploadError> {
        let renewed = self.signer.request_signed_url(&self.request).await?;
        log_info(
            "upload-queue",
            &format!("🔄 Renewed upload URL for {}", self.request.filename),
        )
        .unwrap_or_default();
        self.events.publish(UploadEventPayload::UrlRenewed {
            item_id: self.item_id.clone(),
        });
        Ok(renewed)
    }
}
