//! Fakes for driving `UploadManager` without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use verifydesk_uploads::error::UploadError;
use verifydesk_uploads::preview::MemoryPreviewStore;
use verifydesk_uploads::uploads::upload::HighWaterProgress;
use verifydesk_uploads::uploads::{
    FinalizedMedia, MediaKind, MediaType, SignedUpload, SignedUrlClient, SignedUrlRequest,
    SourceFile, Submitter, TransportHooks, TransportOutcome, UploadItem, UploadManager,
    UploadManagerBuilder, UploadTransport,
};

/// Hands out numbered URLs: upload `https://storage.test/{n}/{file}`,
/// public `https://cdn.test/{n}/{file}`
#[derive(Default)]
pub struct FakeSignedUrlClient {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<UploadError>>,
}

impl FakeSignedUrlClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, error: UploadError) {
        self.failures.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl SignedUrlClient for FakeSignedUrlClient {
    async fn request_signed_url(
        &self,
        request: &SignedUrlRequest,
    ) -> Result<SignedUpload, UploadError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(SignedUpload {
            upload_url: format!("https://storage.test/{}/{}", n, request.filename),
            public_url: format!("https://cdn.test/{}/{}", n, request.filename),
        })
    }
}

#[derive(Clone)]
pub enum Step {
    Succeed,
    /// 409 with an optional existing URL in the body
    Duplicate(Option<String>),
    /// Expire halfway through, renew, resend
    ExpireOnce,
    Fail(u16, &'static str),
    /// Block until the item is cancelled
    Hang,
    /// Wait for a permit, then succeed
    Gated(Arc<Semaphore>),
}

#[derive(Debug, Clone)]
pub struct SentBody {
    pub upload_url: String,
    pub content_type: String,
    pub len: usize,
}

/// Plays a per-file script of outcomes; unscripted uploads succeed
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    sent: Mutex<Vec<SentBody>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, filename: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(filename.to_string(), steps.into_iter().collect());
    }

    pub fn sent(&self) -> Vec<SentBody> {
        self.sent.lock().unwrap().clone()
    }

    fn next_step(&self, upload_url: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .iter_mut()
            .find(|(name, _)| upload_url.ends_with(&format!("/{}", name)))
            .and_then(|(_, steps)| steps.pop_front())
            .unwrap_or(Step::Succeed)
    }

    async fn stream(progress: &HighWaterProgress, hooks: &TransportHooks, total: u64, upto: u64) -> Result<(), UploadError> {
        let step = (total / 4).max(1);
        let mut loaded = 0;
        while loaded < upto {
            if hooks.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            loaded = (loaded + step).min(upto);
            progress.report(loaded, total);
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload(
        &self,
        body: Bytes,
        content_type: &str,
        target: SignedUpload,
        hooks: TransportHooks,
    ) -> Result<TransportOutcome, UploadError> {
        self.sent.lock().unwrap().push(SentBody {
            upload_url: target.upload_url.clone(),
            content_type: content_type.to_string(),
            len: body.len(),
        });

        let total = body.len() as u64;
        let progress = HighWaterProgress::new(hooks.on_progress.clone());

        match self.next_step(&target.upload_url) {
            Step::Succeed => {
                Self::stream(&progress, &hooks, total, total).await?;
                Ok(TransportOutcome::Uploaded(target.public_url))
            }
            Step::Duplicate(existing) => {
                Ok(TransportOutcome::Duplicate(existing.unwrap_or(target.public_url)))
            }
            Step::ExpireOnce => {
                Self::stream(&progress, &hooks, total, total / 2).await?;
                let renewed = hooks.renewer.renew().await?;
                self.sent.lock().unwrap().push(SentBody {
                    upload_url: renewed.upload_url.clone(),
                    content_type: content_type.to_string(),
                    len: body.len(),
                });
                Self::stream(&progress, &hooks, total, total).await?;
                Ok(TransportOutcome::Uploaded(renewed.public_url))
            }
            Step::Fail(status, message) => Err(UploadError::transport(
                format!("Upload failed with status {}: {}", status, message),
                Some(status),
            )),
            Step::Hang => {
                Self::stream(&progress, &hooks, total, total / 2).await?;
                hooks.cancel.cancelled().await;
                Err(UploadError::Cancelled)
            }
            Step::Gated(gate) => {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| UploadError::Other(e.to_string()))?;
                Self::stream(&progress, &hooks, total, total).await?;
                Ok(TransportOutcome::Uploaded(target.public_url))
            }
        }
    }
}

/// Keeps what it was handed
#[derive(Default)]
pub struct RecordingSubmitter {
    pub submitted: Mutex<Vec<Vec<FinalizedMedia>>>,
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(&self, media: Vec<FinalizedMedia>) -> Result<(), UploadError> {
        self.submitted.lock().unwrap().push(media);
        Ok(())
    }
}

pub struct Harness {
    pub manager: UploadManager,
    pub signer: Arc<FakeSignedUrlClient>,
    pub transport: Arc<ScriptedTransport>,
    pub previews: Arc<MemoryPreviewStore>,
}

pub fn survey_plan() -> MediaType {
    MediaType::new("survey_plan", MediaKind::Pdf, "Survey Plan")
}

pub fn cofo() -> MediaType {
    MediaType::new("cofo", MediaKind::Pdf, "CofO")
}

pub fn site_photo() -> MediaType {
    MediaType::new("site_photo", MediaKind::Image, "Site Photo")
}

pub fn harness() -> Harness {
    harness_with(|builder| builder)
}

pub fn harness_with(customize: impl FnOnce(UploadManagerBuilder) -> UploadManagerBuilder) -> Harness {
    let signer = FakeSignedUrlClient::new();
    let transport = ScriptedTransport::new();
    let previews = Arc::new(MemoryPreviewStore::new());

    let builder = UploadManager::builder()
        .max_files(10)
        .allowed_types(vec![survey_plan(), cofo(), site_photo()])
        .signed_url_client(signer.clone())
        .transport(transport.clone())
        .preview_store(previews.clone());

    let manager = customize(builder).build().expect("manager builds");
    Harness {
        manager,
        signer,
        transport,
        previews,
    }
}

pub fn pdf(name: &str) -> SourceFile {
    SourceFile::new(name, "application/pdf", vec![b'%'; 4096])
}

pub fn png(name: &str, width: u32, height: u32) -> SourceFile {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    SourceFile::new(name, "image/png", buffer)
}

/// Poll until `id` satisfies `predicate`, panicking after a few seconds
pub async fn wait_for(manager: &UploadManager, id: &str, predicate: impl Fn(&UploadItem) -> bool) -> UploadItem {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(item) = manager.item(id) {
            if predicate(&item) {
                return item;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("item {} never reached the expected state: {:?}", id, manager.item(id));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn settle(manager: &UploadManager) {
    tokio::time::timeout(Duration::from_secs(5), manager.wait_until_settled())
        .await
        .expect("uploads settle");
}
