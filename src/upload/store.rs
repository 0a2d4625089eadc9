//! Upload Store
//!
//! Durable storage of upload bytes and completion markers, keyed by upload ID.
//! Backends implement [`UploadStore`] and hand out [`UploadHandle`]s, which
//! own the per-upload lock for as long as they are alive.

use std::sync::Arc;

use super::locks::KeyGuard;
use super::types::{UploadError, UploadId, UploadStatus};

// ============================================================================
// Store Trait
// ============================================================================

/// Trait for upload storage backends
#[async_trait::async_trait]
pub trait UploadStore: Send + Sync {
    /// Allocate empty byte storage and an incomplete marker for `id`.
    ///
    /// Fails with [`UploadError::Allocation`] if `id` already exists.
    async fn create(&self, id: UploadId) -> Result<UploadHandle, UploadError>;

    /// Open an existing upload for mutation.
    ///
    /// Returns `None` if no byte storage exists for `id`. Waits for any
    /// other handle on the same upload to be released.
    async fn load(&self, id: UploadId) -> Result<Option<(UploadHandle, UploadStatus)>, UploadError>;

    /// Read the current state without taking the upload lock.
    ///
    /// While an append is streaming this reports the prefix written so far.
    async fn inspect(&self, id: UploadId) -> Result<Option<UploadStatus>, UploadError>;
}

/// Shared store reference
pub type DynUploadStore = Arc<dyn UploadStore>;

// ============================================================================
// Backend Sink
// ============================================================================

/// Backend-specific access to one open upload
#[async_trait::async_trait]
pub trait UploadSink: Send {
    /// Append all of `data` to the end of the byte storage
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Current length of the byte storage
    async fn byte_len(&mut self) -> std::io::Result<u64>;

    /// Remove the incomplete marker
    async fn remove_marker(&mut self) -> Result<(), UploadError>;

    /// Flush buffered bytes to durable storage
    async fn sync(&mut self) -> std::io::Result<()>;
}

// ============================================================================
// Handle
// ============================================================================

/// An open upload together with its exclusive lock.
///
/// Dropping the handle releases the lock on every path; [`UploadHandle::close`]
/// additionally flushes written bytes before releasing it.
pub struct UploadHandle {
    id: UploadId,
    sink: Box<dyn UploadSink>,
    _guard: KeyGuard,
}

impl UploadHandle {
    pub fn new(id: UploadId, sink: Box<dyn UploadSink>, guard: KeyGuard) -> Self {
        Self {
            id,
            sink,
            _guard: guard,
        }
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Append a chunk, returning the number of bytes written
    pub async fn append(&mut self, data: &[u8]) -> Result<u64, UploadError> {
        self.sink.write(data).await?;
        Ok(data.len() as u64)
    }

    /// Read the offset back from storage
    pub async fn offset(&mut self) -> Result<u64, UploadError> {
        Ok(self.sink.byte_len().await?)
    }

    /// Mark the upload complete. Not idempotent: a second call fails with
    /// [`UploadError::MarkerNotFound`].
    pub async fn mark_complete(&mut self) -> Result<(), UploadError> {
        self.sink.sync().await?;
        self.sink.remove_marker().await
    }

    /// Flush written bytes to durable storage
    pub async fn sync(&mut self) -> Result<(), UploadError> {
        Ok(self.sink.sync().await?)
    }

    /// Flush and release the handle
    pub async fn close(mut self) -> Result<(), UploadError> {
        self.sync().await
    }
}

impl std::fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHandle").field("id", &self.id).finish()
    }
}
