//! Transient preview references for upload items.
//!
//! A preview is owned by exactly one item. The registry keeps the set of live
//! references so teardown can release whatever individual removals missed,
//! and releases each reference at most once.

use crate::error::UploadError;
use crate::uploads::SourceFile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewRef(pub String);

impl PreviewRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PreviewRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend that materializes and revokes previews
pub trait PreviewStore: Send + Sync {
    fn create(&self, file: &SourceFile) -> Result<PreviewRef, UploadError>;
    fn revoke(&self, preview: &PreviewRef);
}

/// Previews written into a private temporary directory, deleted on revoke.
/// The directory itself goes away when the store is dropped.
pub struct TempDirPreviewStore {
    dir: TempDir,
}

impl TempDirPreviewStore {
    pub fn new() -> Result<Self, UploadError> {
        let dir = tempfile::Builder::new().prefix("verifydesk-previews").tempdir()?;
        Ok(Self { dir })
    }

    fn path_for(&self, preview: &PreviewRef) -> Option<PathBuf> {
        let path = PathBuf::from(preview.as_str());
        // Only ever delete inside our own directory
        path.starts_with(self.dir.path()).then_some(path)
    }
}

impl PreviewStore for TempDirPreviewStore {
    fn create(&self, file: &SourceFile) -> Result<PreviewRef, UploadError> {
        let extension = std::path::Path::new(&file.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let path = self
            .dir
            .path()
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));
        std::fs::write(&path, &file.data)?;
        Ok(PreviewRef(path.to_string_lossy().into_owned()))
    }

    fn revoke(&self, preview: &PreviewRef) {
        if let Some(path) = self.path_for(preview) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// In-memory store; keeps a count of revocations per reference
#[derive(Default)]
pub struct MemoryPreviewStore {
    created: Mutex<Vec<PreviewRef>>,
    revoked: Mutex<Vec<PreviewRef>>,
}

impl MemoryPreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<PreviewRef> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn revoked(&self) -> Vec<PreviewRef> {
        self.revoked.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn revoke_count(&self, preview: &PreviewRef) -> usize {
        self.revoked
            .lock()
            .map(|r| r.iter().filter(|p| *p == preview).count())
            .unwrap_or(0)
    }
}

impl PreviewStore for MemoryPreviewStore {
    fn create(&self, _file: &SourceFile) -> Result<PreviewRef, UploadError> {
        let preview = PreviewRef(format!("blob:{}", uuid::Uuid::new_v4()));
        self.created
            .lock()
            .map_err(|e| UploadError::LockPoisoned(e.to_string()))?
            .push(preview.clone());
        Ok(preview)
    }

    fn revoke(&self, preview: &PreviewRef) {
        if let Ok(mut revoked) = self.revoked.lock() {
            revoked.push(preview.clone());
        }
    }
}

/// Live-set bookkeeping over a `PreviewStore`
#[derive(Clone)]
pub struct PreviewRegistry {
    store: Arc<dyn PreviewStore>,
    live: Arc<Mutex<HashSet<PreviewRef>>>,
}

impl std::fmt::Debug for PreviewRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewRegistry")
            .field("store", &"<preview store>")
            .field("live", &self.live_count())
            .finish()
    }
}

impl PreviewRegistry {
    pub fn new(store: Arc<dyn PreviewStore>) -> Self {
        Self {
            store,
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn allocate(&self, file: &SourceFile) -> Result<PreviewRef, UploadError> {
        let preview = self.store.create(file)?;
        self.live
            .lock()
            .map_err(|e| UploadError::LockPoisoned(e.to_string()))?
            .insert(preview.clone());
        Ok(preview)
    }

    /// Release one reference. Returns false if it was already released.
    pub fn release(&self, preview: &PreviewRef) -> bool {
        let was_live = self
            .live
            .lock()
            .map(|mut live| live.remove(preview))
            .unwrap_or(false);
        if was_live {
            self.store.revoke(preview);
        }
        was_live
    }

    /// Release every live reference; returns how many were released
    pub fn release_all(&self) -> usize {
        let drained: Vec<PreviewRef> = match self.live.lock() {
            Ok(mut live) => live.drain().collect(),
            Err(_) => return 0,
        };
        for preview in &drained {
            self.store.revoke(preview);
        }
        drained.len()
    }

    pub fn is_live(&self, preview: &PreviewRef) -> bool {
        self.live
            .lock()
            .map(|live| live.contains(preview))
            .unwrap_or(false)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}
