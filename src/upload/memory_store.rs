//! In-memory upload storage
//!
//! Same semantics as the filesystem store, minus durability across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::locks::{KeyGuard, KeyedLocks};
use super::store::{UploadHandle, UploadSink, UploadStore};
use super::types::{UploadError, UploadId, UploadStatus};

#[derive(Debug, Default)]
struct MemoryUpload {
    bytes: Vec<u8>,
    incomplete: bool,
}

type UploadMap = Arc<RwLock<HashMap<UploadId, MemoryUpload>>>;

/// Upload store kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryUploadStore {
    uploads: UploadMap,
    locks: KeyedLocks,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes stored for `id`
    pub async fn bytes(&self, id: UploadId) -> Option<Vec<u8>> {
        let uploads = self.uploads.read().await;
        uploads.get(&id).map(|upload| upload.bytes.clone())
    }

    /// Number of uploads held
    pub async fn upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }

    fn handle(&self, id: UploadId, guard: KeyGuard) -> UploadHandle {
        let sink = MemoryUploadSink {
            id,
            uploads: self.uploads.clone(),
        };
        UploadHandle::new(id, Box::new(sink), guard)
    }
}

#[async_trait::async_trait]
impl UploadStore for MemoryUploadStore {
    async fn create(&self, id: UploadId) -> Result<UploadHandle, UploadError> {
        let guard = self.locks.lock(id).await;

        {
            let mut uploads = self.uploads.write().await;
            if uploads.contains_key(&id) {
                return Err(UploadError::Allocation {
                    id,
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "upload already exists",
                    ),
                });
            }
            uploads.insert(
                id,
                MemoryUpload {
                    bytes: Vec::new(),
                    incomplete: true,
                },
            );
        }

        Ok(self.handle(id, guard))
    }

    async fn load(&self, id: UploadId) -> Result<Option<(UploadHandle, UploadStatus)>, UploadError> {
        let guard = self.locks.lock(id).await;

        let Some(status) = self.inspect(id).await? else {
            return Ok(None);
        };

        Ok(Some((self.handle(id, guard), status)))
    }

    async fn inspect(&self, id: UploadId) -> Result<Option<UploadStatus>, UploadError> {
        let uploads = self.uploads.read().await;
        Ok(uploads
            .get(&id)
            .map(|upload| UploadStatus::new(upload.bytes.len() as u64, !upload.incomplete)))
    }
}

struct MemoryUploadSink {
    id: UploadId,
    uploads: UploadMap,
}

impl MemoryUploadSink {
    fn gone(&self) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("upload {} vanished from memory store", self.id),
        )
    }
}

#[async_trait::async_trait]
impl UploadSink for MemoryUploadSink {
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut uploads = self.uploads.write().await;
        let upload = uploads.get_mut(&self.id).ok_or_else(|| self.gone())?;
        upload.bytes.extend_from_slice(data);
        Ok(())
    }

    async fn byte_len(&mut self) -> std::io::Result<u64> {
        let uploads = self.uploads.read().await;
        let upload = uploads.get(&self.id).ok_or_else(|| self.gone())?;
        Ok(upload.bytes.len() as u64)
    }

    async fn remove_marker(&mut self) -> Result<(), UploadError> {
        let mut uploads = self.uploads.write().await;
        let upload = uploads.get_mut(&self.id).ok_or_else(|| self.gone())?;
        if !upload.incomplete {
            return Err(UploadError::MarkerNotFound(self.id));
        }
        upload.incomplete = false;
        Ok(())
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryUploadStore::new();
        let id = UploadId::new();

        let mut handle = store.create(id).await.unwrap();
        handle.append(b"abc").await.unwrap();
        handle.close().await.unwrap();

        let (mut handle, status) = store.load(id).await.unwrap().unwrap();
        assert_eq!(status, UploadStatus::new(3, false));
        handle.append(b"def").await.unwrap();
        handle.mark_complete().await.unwrap();
        assert!(matches!(
            handle.mark_complete().await,
            Err(UploadError::MarkerNotFound(_))
        ));
        handle.close().await.unwrap();

        assert_eq!(store.bytes(id).await.unwrap(), b"abcdef");
        assert_eq!(store.inspect(id).await.unwrap(), Some(UploadStatus::new(6, true)));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_duplicate_create() {
        let store = MemoryUploadStore::new();
        let id = UploadId::new();

        store.create(id).await.unwrap().close().await.unwrap();

        assert!(matches!(store.create(id).await, Err(UploadError::Allocation { .. })));
        assert_eq!(store.upload_count().await, 1);
    }
}
