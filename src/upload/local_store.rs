//! Local filesystem upload storage
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<id>             raw accumulated bytes
//! <root>/<id>.incomplete  empty marker, present until the upload completes
//! ```
//!
//! The marker is written before the byte file, so a byte file without a
//! marker can only be the result of a completed upload.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::locks::KeyedLocks;
use super::store::{UploadHandle, UploadSink, UploadStore};
use super::types::{UploadError, UploadId, UploadStatus, INCOMPLETE_EXT};

// ============================================================================
// Local Upload Store
// ============================================================================

/// Filesystem-backed upload store
pub struct LocalUploadStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl LocalUploadStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, UploadError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        tracing::debug!(root = %root.display(), "Opened local upload store");

        Ok(Self {
            root,
            locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, id: UploadId) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn marker_path(&self, id: UploadId) -> PathBuf {
        self.root.join(format!("{}.{}", id, INCOMPLETE_EXT))
    }

    /// Resolve a missing byte file: an orphaned marker means creation was
    /// interrupted, anything else means the upload never existed.
    async fn missing_data(&self, id: UploadId) -> Result<Option<UploadStatus>, UploadError> {
        if exists(&self.marker_path(id)).await? {
            tracing::warn!(upload_id = %id, "Incomplete marker without upload data");
            return Err(UploadError::Corrupted(id));
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl UploadStore for LocalUploadStore {
    async fn create(&self, id: UploadId) -> Result<UploadHandle, UploadError> {
        let guard = self.locks.lock(id).await;
        let marker_path = self.marker_path(id);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker_path)
            .await
            .map_err(|source| UploadError::Allocation { id, source })?;

        let file = match OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(self.data_path(id))
            .await
        {
            Ok(file) => file,
            Err(source) => {
                if let Err(e) = fs::remove_file(&marker_path).await {
                    tracing::warn!(
                        upload_id = %id,
                        error = %e,
                        "Failed to remove marker of unallocated upload"
                    );
                }
                return Err(UploadError::Allocation { id, source });
            }
        };

        let sink = LocalUploadSink { id, file, marker_path };
        Ok(UploadHandle::new(id, Box::new(sink), guard))
    }

    async fn load(&self, id: UploadId) -> Result<Option<(UploadHandle, UploadStatus)>, UploadError> {
        let guard = self.locks.lock(id).await;

        let file = match OpenOptions::new().append(true).open(self.data_path(id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return self.missing_data(id).await.map(|_| None);
            }
            Err(e) => return Err(e.into()),
        };

        let offset = file.metadata().await?.len();
        let marker_path = self.marker_path(id);
        let complete = !exists(&marker_path).await?;

        let sink = LocalUploadSink { id, file, marker_path };
        Ok(Some((
            UploadHandle::new(id, Box::new(sink), guard),
            UploadStatus::new(offset, complete),
        )))
    }

    async fn inspect(&self, id: UploadId) -> Result<Option<UploadStatus>, UploadError> {
        let offset = match fs::metadata(self.data_path(id)).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return self.missing_data(id).await,
            Err(e) => return Err(e.into()),
        };

        let complete = !exists(&self.marker_path(id)).await?;
        Ok(Some(UploadStatus::new(offset, complete)))
    }
}

// ============================================================================
// Local Sink
// ============================================================================

struct LocalUploadSink {
    id: UploadId,
    file: File,
    marker_path: PathBuf,
}

#[async_trait::async_trait]
impl UploadSink for LocalUploadSink {
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data).await
    }

    async fn byte_len(&mut self) -> std::io::Result<u64> {
        // tokio buffers writes; flush so metadata sees them
        self.file.flush().await?;
        Ok(self.file.metadata().await?.len())
    }

    async fn remove_marker(&mut self) -> Result<(), UploadError> {
        match fs::remove_file(&self.marker_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(UploadError::MarkerNotFound(self.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn exists(path: &Path) -> std::io::Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Tests
// ============================================================================
