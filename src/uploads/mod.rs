// Module declarations
pub mod compression;
pub mod gate;
mod processor;
pub mod speed;
mod state;
pub mod types;
pub mod upload;

// Re-export types and constants from submodules
pub use types::*;

pub use compression::{CompressionProgress, Compressor, ImageCompressor};
pub use gate::GateReport;
pub use speed::{SpeedEstimate, SpeedTracker};
pub use upload::{
    HttpSignedUrlClient, HttpTransport, SignedUpload, SignedUrlClient, SignedUrlRequest,
    TransferProgress, TransportHooks, TransportOutcome, UploadTransport, UrlRenewer,
};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::analytics::{LogTracker, Tracker};
use crate::config::{UploaderConfig, DEFAULT_FOLDER, DEFAULT_MAX_FILES};
use crate::error::UploadError;
use crate::events::{AnalyticsEventHandler, EventBus, EventReceiver, UploadEventPayload};
use crate::logging::{log_info, log_warn};
use crate::network::{NetworkObserver, NetworkState};
use crate::preview::{PreviewRegistry, PreviewStore, TempDirPreviewStore};
use crate::shutdown::ShutdownCoordinator;
use crate::validation::{format_size, UploadPolicy, Validation};
use processor::UploadProcessor;

/// Receives the finalized list once every submission rule passes
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, media: Vec<FinalizedMedia>) -> Result<(), UploadError>;
}

pub struct UploadManagerBuilder {
    max_files: usize,
    allowed_types: Vec<MediaType>,
    required_types: Vec<MediaType>,
    folder: String,
    policy: UploadPolicy,
    compressor: Option<Arc<dyn Compressor>>,
    signer: Option<Arc<dyn SignedUrlClient>>,
    transport: Option<Arc<dyn UploadTransport>>,
    preview_store: Option<Arc<dyn PreviewStore>>,
    tracker: Option<Arc<dyn Tracker>>,
}

impl Default for UploadManagerBuilder {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            allowed_types: Vec::new(),
            required_types: Vec::new(),
            folder: DEFAULT_FOLDER.to_string(),
            policy: UploadPolicy::default(),
            compressor: None,
            signer: None,
            transport: None,
            preview_store: None,
            tracker: None,
        }
    }
}

impl UploadManagerBuilder {
    pub fn max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn allowed_types(mut self, types: Vec<MediaType>) -> Self {
        self.allowed_types = types;
        self
    }

    pub fn required_types(mut self, types: Vec<MediaType>) -> Self {
        self.required_types = types;
        self
    }

    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn signed_url_client(mut self, signer: Arc<dyn SignedUrlClient>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn UploadTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn preview_store(mut self, store: Arc<dyn PreviewStore>) -> Self {
        self.preview_store = Some(store);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> Result<UploadManager, UploadError> {
        let signer = self
            .signer
            .ok_or_else(|| UploadError::Config("A signed URL client is required".to_string()))?;
        let transport: Arc<dyn UploadTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let compressor = self
            .compressor
            .unwrap_or_else(|| Arc::new(ImageCompressor::default()));
        let preview_store: Arc<dyn PreviewStore> = match self.preview_store {
            Some(store) => store,
            None => Arc::new(TempDirPreviewStore::new()?),
        };

        if self.max_files == 0 {
            return Err(UploadError::Config("max_files must be at least 1".to_string()));
        }
        for required in &self.required_types {
            if !self.allowed_types.iter().any(|t| t.key == required.key) {
                return Err(UploadError::Config(format!(
                    "required type '{}' is not in the allowed types",
                    required.key
                )));
            }
        }

        let events = EventBus::default();
        let shutdown = ShutdownCoordinator::new();

        if let Some(tracker) = self.tracker {
            tokio::runtime::Handle::try_current().map_err(|e| {
                UploadError::Config(format!("Analytics needs an async runtime: {}", e))
            })?;
            AnalyticsEventHandler::new(events.clone(), tracker, shutdown.clone()).start();
        }

        let processor = UploadProcessor::new(compressor, signer, transport, events.clone(), self.folder);

        Ok(UploadManager {
            processor,
            policy: self.policy,
            max_files: self.max_files,
            allowed_types: self.allowed_types,
            required_types: self.required_types,
            previews: PreviewRegistry::new(preview_store),
            events,
            shutdown,
        })
    }
}

/// Owns one upload session: the item list, their pipelines, and previews
pub struct UploadManager {
    processor: UploadProcessor,
    policy: UploadPolicy,
    max_files: usize,
    allowed_types: Vec<MediaType>,
    required_types: Vec<MediaType>,
    previews: PreviewRegistry,
    events: EventBus,
    shutdown: ShutdownCoordinator,
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("items", &"<upload items>")
            .field("max_files", &self.max_files)
            .field("allowed_types", &self.allowed_types.len())
            .field("required_types", &self.required_types.len())
            .field("previews", &self.previews)
            .finish()
    }
}

impl UploadManager {
    pub fn builder() -> UploadManagerBuilder {
        UploadManagerBuilder::default()
    }

    /// Builder wired with the HTTP clients and limits from `config`
    pub fn from_config(config: &UploaderConfig) -> Result<UploadManagerBuilder, UploadError> {
        Ok(Self::builder()
            .max_files(config.max_files)
            .allowed_types(config.media_types.clone())
            .required_types(config.resolve_required_types()?)
            .folder(config.folder.clone())
            .policy(UploadPolicy::from_config(&config.policy))
            .compressor(Arc::new(ImageCompressor::new(&config.compression)))
            .signed_url_client(Arc::new(HttpSignedUrlClient::from_config(config)?))
            .tracker(Arc::new(LogTracker)))
    }

    /// Validate and admit a batch, starting an upload for every accepted file.
    ///
    /// The whole batch is refused when it would take the session past
    /// `max_files`. Otherwise invalid files are skipped and reported.
    pub fn add_files(&self, files: Vec<SourceFile>) -> Result<AdmissionReport, UploadError> {
        let mut report = AdmissionReport::default();
        if files.is_empty() {
            return Ok(report);
        }

        // pipelines are spawned onto the caller's runtime; refuse before admitting anything
        tokio::runtime::Handle::try_current()
            .map_err(|e| UploadError::Other(format!("No async runtime to run uploads on: {}", e)))?;

        let current = self.processor.lock()?.items.len();
        self.check_capacity(current, files.len())
            .map_err(|e| self.reject_batch(e))?;

        let mut admitted = Vec::new();
        for file in files {
            match self.policy.validate(&file) {
                Validation::Valid(kind) => {
                    let preview = match self.previews.allocate(&file) {
                        Ok(preview) => Some(preview),
                        Err(e) => {
                            log_warn("upload-queue", &format!("No preview for {}: {}", file.name, e))
                                .unwrap_or_default();
                            None
                        }
                    };
                    admitted.push(UploadItem::new(file, kind, preview));
                }
                Validation::Invalid { reason } => {
                    self.events.publish(UploadEventPayload::ItemRejected {
                        filename: file.name.clone(),
                        reason: reason.clone(),
                    });
                    report.rejected.push(RejectedFile {
                        filename: file.name,
                        reason,
                    });
                }
            }
        }

        let late_rejection = {
            let mut session = self.processor.lock()?;
            // another batch may have landed while this one was validated
            let fits = self.check_capacity(session.items.len(), admitted.len());
            if fits.is_ok() {
                for item in &admitted {
                    session.items.insert(item.id.clone(), item.clone());
                }
            }
            fits.err()
        };
        if let Some(e) = late_rejection {
            for preview in admitted.iter().filter_map(|i| i.preview.as_ref()) {
                self.previews.release(preview);
            }
            return Err(self.reject_batch(e));
        }

        for item in &admitted {
            self.events.publish(UploadEventPayload::ItemAdded {
                item_id: item.id.clone(),
                filename: item.filename.clone(),
                kind: item.kind,
                size: item.size,
            });
            if item.kind == MediaKind::Video && item.size > LARGE_VIDEO_WARNING_BYTES {
                log_warn(
                    "upload-queue",
                    &format!(
                        "⚠️ {} is {}; the upload may take a while",
                        item.filename,
                        format_size(item.size)
                    ),
                )
                .unwrap_or_default();
                self.events.publish(UploadEventPayload::LargeUploadWarning {
                    item_id: item.id.clone(),
                    filename: item.filename.clone(),
                    size: item.size,
                });
            }
            report.admitted.push(item.id.clone());
        }

        if let Some(message) = report.validation_message() {
            log_warn("upload-queue", &message).unwrap_or_default();
            self.events
                .publish(UploadEventPayload::BatchRejected { message });
        }

        for id in &report.admitted {
            // a refused start leaves the item in error, visible and retryable
            let _ = self.processor.start_or_fail(id);
        }

        Ok(report)
    }

    /// Pure check; safe to call with the session locked
    fn check_capacity(&self, current: usize, incoming: usize) -> Result<(), UploadError> {
        if current + incoming <= self.max_files {
            return Ok(());
        }
        Err(UploadError::TooManyFiles {
            max: self.max_files,
            current,
            incoming,
        })
    }

    /// Log and publish a refused batch. Call with the session unlocked.
    fn reject_batch(&self, err: UploadError) -> UploadError {
        log_warn("upload-queue", &err.to_string()).unwrap_or_default();
        self.events.publish(UploadEventPayload::BatchRejected {
            message: err.to_string(),
        });
        err
    }

    /// Restart a failed (or cancelled) item from the beginning
    pub fn retry(&self, id: &str) -> Result<(), UploadError> {
        self.processor.start(id)
    }

    /// Retry every failed item that still has its file
    pub fn retry_failed(&self) -> usize {
        self.processor.retry_failed()
    }

    /// Abort an in-flight item; it is `idle` when this returns.
    /// Returns false if the item was not in flight.
    pub fn cancel(&self, id: &str) -> Result<bool, UploadError> {
        let cancelled = {
            let mut session = self.processor.lock()?;
            if !session.items.contains_key(id) {
                return Err(UploadError::ItemNotFound(id.to_string()));
            }
            session.cancel_item(id)
        };

        match cancelled {
            Some(item) => {
                log_info("upload-queue", &format!("Cancelled upload of {}", item.filename))
                    .unwrap_or_default();
                self.processor.publish_status(&item);
                self.processor.notify_settled();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Abort every in-flight item. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let cancelled: Vec<UploadItem> = match self.processor.lock() {
            Ok(mut session) => {
                let ids: Vec<String> = session
                    .items
                    .values()
                    .filter(|i| i.status.is_in_flight())
                    .map(|i| i.id.clone())
                    .collect();
                ids.iter().filter_map(|id| session.cancel_item(id)).collect()
            }
            Err(_) => return 0,
        };

        for item in &cancelled {
            self.processor.publish_status(item);
        }
        if !cancelled.is_empty() {
            log_info("upload-queue", &format!("Cancelled {} upload(s)", cancelled.len()))
                .unwrap_or_default();
            self.processor.notify_settled();
        }
        cancelled.len()
    }

    /// Drop an item from the session, aborting its upload and releasing its preview
    pub fn remove(&self, id: &str) -> Result<(), UploadError> {
        let removed = {
            let mut session = self.processor.lock()?;
            let item = session
                .items
                .shift_remove(id)
                .ok_or_else(|| UploadError::ItemNotFound(id.to_string()))?;
            if let Some(token) = session.tokens.remove(id) {
                token.cancel();
            }
            session.speeds.reset(id);
            item
        };

        if let Some(preview) = &removed.preview {
            self.previews.release(preview);
        }
        self.events.publish(UploadEventPayload::ItemRemoved {
            item_id: removed.id.clone(),
        });
        self.processor.notify_settled();
        Ok(())
    }

    pub fn update_metadata(&self, id: &str, metadata: MediaMetadata) -> Result<UploadItem, UploadError> {
        gate::validate_metadata(&metadata, &self.allowed_types)?;

        let updated = {
            let mut session = self.processor.lock()?;
            let current = session
                .items
                .get(id)
                .ok_or_else(|| UploadError::ItemNotFound(id.to_string()))?;

            let mut updated = current.clone();
            // the remote URL is owned by the pipeline, not the editor
            updated.metadata = MediaMetadata {
                url: current.metadata.url.clone(),
                ..metadata
            };
            session.items.insert(id.to_string(), updated.clone());
            updated
        };

        self.events.publish(UploadEventPayload::MetadataUpdated {
            item_id: id.to_string(),
        });
        Ok(updated)
    }

    /// Snapshot of every item in insertion order
    pub fn items(&self) -> Vec<UploadItem> {
        self.processor
            .lock()
            .map(|s| s.items.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn item(&self, id: &str) -> Option<UploadItem> {
        self.processor
            .lock()
            .ok()
            .and_then(|s| s.items.get(id).cloned())
    }

    pub fn media_items(&self) -> Vec<MediaItem> {
        self.items().iter().map(UploadItem::to_media_item).collect()
    }

    pub fn counts(&self) -> UploadCounts {
        self.processor
            .lock()
            .map(|s| UploadCounts::from_items(s.items.values()))
            .unwrap_or_default()
    }

    pub fn gate_report(&self) -> GateReport {
        gate::evaluate(&self.items(), &self.required_types)
    }

    pub fn allowed_types(&self) -> &[MediaType] {
        &self.allowed_types
    }

    pub fn required_types(&self) -> &[MediaType] {
        &self.required_types
    }

    /// Hand the finalized list to `submitter` and dispose the session on success.
    /// A blocked gate leaves every item as it was.
    pub async fn submit(&self, submitter: &dyn Submitter) -> Result<Vec<FinalizedMedia>, UploadError> {
        let items = self.items();
        let report = gate::evaluate(&items, &self.required_types);
        if !report.is_ready() {
            log_warn(
                "upload-queue",
                &format!("Submission blocked: {}", report.blocking.join("; ")),
            )
            .unwrap_or_default();
            return Err(UploadError::SubmissionBlocked(report.blocking));
        }

        let finalized = gate::finalize(&items);
        submitter.submit(finalized.clone()).await?;

        log_info(
            "upload-queue",
            &format!("✅ Submitted {} document(s)", finalized.len()),
        )
        .unwrap_or_default();
        self.events.publish(UploadEventPayload::Submitted {
            count: finalized.len(),
        });
        self.dispose();
        Ok(finalized)
    }

    /// Clear the session: abort anything in flight and release every live
    /// preview. Returns how many previews were released.
    pub fn dispose(&self) -> usize {
        let tokens: Vec<_> = match self.processor.lock() {
            Ok(mut session) => {
                session.items.clear();
                session.speeds.clear();
                session.tokens.drain().map(|(_, token)| token).collect()
            }
            Err(_) => Vec::new(),
        };
        for token in tokens {
            token.cancel();
        }

        let released = self.previews.release_all();
        self.events.publish(UploadEventPayload::SessionDisposed {
            released_previews: released,
        });
        self.processor.notify_settled();
        released
    }

    /// Every mutation of the session is published here
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    /// Follow connectivity changes: warn when going offline, retry failed
    /// items when coming back online. Runs until the manager is dropped.
    pub fn watch_network(&self, observer: &dyn NetworkObserver) -> Result<JoinHandle<()>, UploadError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UploadError::Other(format!("No async runtime to watch the network on: {}", e)))?;

        let mut rx = observer.subscribe();
        let mut shutdown_signal = self.shutdown.signal();
        let processor = self.processor.clone();
        // read now so a change made before the task first runs is not missed
        let mut last = *rx.borrow_and_update();

        Ok(runtime.spawn(async move {
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *rx.borrow_and_update();
                        if state == last {
                            continue;
                        }
                        last = state;

                        match state {
                            NetworkState::Offline => {
                                log_warn("network", "📡 Connection lost, uploads in progress may fail")
                                    .unwrap_or_default();
                                processor.events().publish(UploadEventPayload::NetworkOffline);
                            }
                            NetworkState::Online => {
                                let retried = processor.retry_failed();
                                log_info(
                                    "network",
                                    &format!("📡 Back online, retrying {} failed upload(s)", retried),
                                )
                                .unwrap_or_default();
                                processor
                                    .events()
                                    .publish(UploadEventPayload::NetworkOnline { retried });
                            }
                        }
                    }
                    _ = shutdown_signal.triggered() => break,
                }
            }
        }))
    }

    /// Resolves once no item is compressing or uploading
    pub async fn wait_until_settled(&self) {
        self.processor.wait_until_settled().await
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        if let Ok(mut session) = self.processor.session.lock() {
            for (_, token) in session.tokens.drain() {
                token.cancel();
            }
        }
        self.previews.release_all();
        self.shutdown.shutdown();
    }
}
