//! Upload Lifecycle Engine
//!
//! Protocol rules for creating, appending to and querying uploads. The engine
//! keeps no state of its own: everything it reports is read back from the
//! store, and the store's per-upload lock spans each load-check-append
//! sequence.

use std::sync::Arc;

use axum::body::Bytes;
use futures::{Stream, StreamExt};

use super::store::{DynUploadStore, UploadHandle, UploadStore};
use super::types::{AppendOutcome, UploadCreated, UploadError, UploadId, UploadStatus};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stateless protocol logic over an [`UploadStore`]
#[derive(Clone)]
pub struct UploadEngine {
    store: DynUploadStore,
}

impl UploadEngine {
    pub fn new(store: impl UploadStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn with_store(store: DynUploadStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynUploadStore {
        &self.store
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Create a new upload from the first chunk.
    ///
    /// If streaming the body fails the partially written upload is kept and
    /// reported through [`UploadError::Interrupted`], so the caller can still
    /// hand out its location and resume it like any other incomplete upload.
    pub async fn create<S, E>(&self, body: S, complete: bool) -> Result<UploadCreated, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<BoxError>,
    {
        let id = UploadId::new();
        let mut handle = self.store.create(id).await?;

        tracing::info!(upload_id = %id, "Created upload");

        if let Err(source) = stream_into(&mut handle, body).await {
            let offset = match handle.offset().await {
                Ok(offset) => offset,
                Err(e) => {
                    tracing::error!(upload_id = %id, error = %e, "Failed to read back partial upload");
                    return Err(source);
                }
            };

            return Err(UploadError::Interrupted {
                created: UploadCreated {
                    id,
                    status: UploadStatus::new(offset, false),
                },
                source: Box::new(source),
            });
        }

        // Offset comes from storage, not from counting the copy
        let offset = handle.offset().await?;

        if complete {
            handle.mark_complete().await?;
        }
        handle.close().await?;

        let status = UploadStatus::new(offset, complete);
        tracing::info!(
            upload_id = %id,
            offset = status.offset,
            complete = status.complete,
            "Upload creation finished"
        );

        Ok(UploadCreated { id, status })
    }

    /// Report the current offset and completion of an upload
    pub async fn query(&self, id: UploadId) -> Result<UploadStatus, UploadError> {
        let status = self
            .store
            .inspect(id)
            .await?
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        tracing::debug!(
            upload_id = %id,
            offset = status.offset,
            complete = status.complete,
            "Queried upload"
        );

        Ok(status)
    }

    /// Append a chunk at `client_offset`.
    ///
    /// Checks run in order: existence, offset agreement, completion. Only
    /// when all pass is the body written.
    pub async fn append<S, E>(
        &self,
        id: UploadId,
        client_offset: u64,
        complete: bool,
        body: S,
    ) -> Result<AppendOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<BoxError>,
    {
        let Some((mut handle, server)) = self.store.load(id).await? else {
            return Err(UploadError::NotFound(id.to_string()));
        };

        if client_offset != server.offset {
            tracing::warn!(
                upload_id = %id,
                client_offset = client_offset,
                server_offset = server.offset,
                "Upload offset mismatch"
            );
            return Ok(AppendOutcome::OffsetConflict(server));
        }

        if server.complete {
            tracing::debug!(upload_id = %id, offset = server.offset, "Upload already complete");
            return Ok(AppendOutcome::AlreadyComplete(server));
        }

        let written = stream_into(&mut handle, body).await?;
        let offset = server.offset + written;

        if complete {
            handle.mark_complete().await?;
        }
        handle.close().await?;

        tracing::debug!(
            upload_id = %id,
            written = written,
            offset = offset,
            complete = complete,
            "Appended to upload"
        );
        if complete {
            tracing::info!(upload_id = %id, offset = offset, "Upload complete");
        }

        Ok(AppendOutcome::Appended(UploadStatus::new(offset, complete)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Copy a request body into the upload chunk by chunk.
///
/// On failure whatever was written stays in place and is flushed before the
/// error is returned.
async fn stream_into<S, E>(handle: &mut UploadHandle, body: S) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let result = match chunk {
            Ok(bytes) => handle.append(&bytes).await,
            Err(e) => Err(UploadError::Io(std::io::Error::other(e))),
        };

        match result {
            Ok(n) => written += n,
            Err(e) => {
                tracing::warn!(
                    upload_id = %handle.id(),
                    written = written,
                    error = %e,
                    "Upload body interrupted"
                );
                if let Err(sync_err) = handle.sync().await {
                    tracing::error!(
                        upload_id = %handle.id(),
                        error = %sync_err,
                        "Failed to flush partial upload"
                    );
                }
                return Err(e);
            }
        }
    }

    Ok(written)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{LocalUploadStore, MemoryUploadStore};
    use futures::stream;
    use tempfile::TempDir;

    type Chunk = Result<Bytes, std::io::Error>;

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = Chunk> + Send {
        stream::iter(
            chunks
                .iter()
                .copied()
                .map(|chunk| Ok(Bytes::from_static(chunk)))
                .collect::<Vec<_>>(),
        )
    }

    fn empty() -> impl Stream<Item = Chunk> + Send {
        body(&[])
    }

    async fn local_engine() -> (TempDir, UploadEngine) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalUploadStore::new(temp_dir.path()).await.unwrap();
        (temp_dir, UploadEngine::new(store))
    }

    #[tokio::test]
    async fn test_protocol_scenario() {
        let (_temp_dir, engine) = local_engine().await;

        let created = engine.create(empty(), false).await.unwrap();
        assert_eq!(created.status, UploadStatus::new(0, false));
        let id = created.id;

        let outcome = engine.append(id, 0, false, body(&[b"abc"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(UploadStatus::new(3, false)));

        let outcome = engine.append(id, 0, false, body(&[b"xyz"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::OffsetConflict(UploadStatus::new(3, false)));

        let outcome = engine.append(id, 3, true, body(&[b"def"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(UploadStatus::new(6, true)));

        let outcome = engine.append(id, 6, false, body(&[b"ghi"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::AlreadyComplete(UploadStatus::new(6, true)));

        assert_eq!(engine.query(id).await.unwrap(), UploadStatus::new(6, true));
    }

    #[tokio::test]
    async fn test_offset_matches_cumulative_length() {
        let store = MemoryUploadStore::new();
        let engine = UploadEngine::new(store.clone());

        let created = engine.create(body(&[b"first-", b"chunk"]), false).await.unwrap();
        assert_eq!(created.status.offset, 11);

        let mut offset = created.status.offset;
        for chunk in [&b"12345"[..], b"", b"678"] {
            let outcome = engine.append(created.id, offset, false, body(&[chunk])).await.unwrap();
            offset = outcome.status().offset;
        }

        assert_eq!(offset, 19);
        assert_eq!(engine.query(created.id).await.unwrap(), UploadStatus::new(19, false));
        assert_eq!(store.bytes(created.id).await.unwrap(), b"first-chunk12345678");
    }

    #[tokio::test]
    async fn test_create_with_completion_signal() {
        let (_temp_dir, engine) = local_engine().await;

        let created = engine.create(body(&[b"whole payload"]), true).await.unwrap();
        assert_eq!(created.status, UploadStatus::new(13, true));

        // Even a matching offset cannot extend a finished upload
        let outcome = engine.append(created.id, 13, false, body(&[b"more"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::AlreadyComplete(UploadStatus::new(13, true)));
    }

    #[tokio::test]
    async fn test_completed_upload_rejects_any_append() {
        let store = MemoryUploadStore::new();
        let engine = UploadEngine::new(store.clone());

        let id = engine.create(body(&[b"data"]), true).await.unwrap().id;

        for (offset, complete) in [(4, true), (4, false), (0, false)] {
            let outcome = engine.append(id, offset, complete, body(&[b"x"])).await.unwrap();
            assert_eq!(outcome.status(), UploadStatus::new(4, true));
            assert!(!matches!(outcome, AppendOutcome::Appended(_)));
        }
        assert_eq!(store.bytes(id).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_conflict_writes_nothing() {
        let store = MemoryUploadStore::new();
        let engine = UploadEngine::new(store.clone());
        let id = engine.create(body(&[b"abc"]), false).await.unwrap().id;

        for stale in [0, 2, 4, 100] {
            let outcome = engine.append(id, stale, true, body(&[b"zzz"])).await.unwrap();
            assert_eq!(outcome, AppendOutcome::OffsetConflict(UploadStatus::new(3, false)));
        }
        assert_eq!(store.bytes(id).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_unknown_upload_is_not_found() {
        let (_temp_dir, engine) = local_engine().await;
        let id = UploadId::new();

        assert!(matches!(engine.query(id).await, Err(UploadError::NotFound(_))));
        assert!(matches!(
            engine.append(id, 0, true, body(&[b"abc"])).await,
            Err(UploadError::NotFound(_))
        ));
        assert!(engine.store().inspect(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupted_append_keeps_prefix() {
        let (_temp_dir, engine) = local_engine().await;
        let id = engine.create(empty(), false).await.unwrap().id;

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
            Ok(Bytes::from_static(b"never written")),
        ]);
        let result = engine.append(id, 0, true, broken).await;
        assert!(matches!(result, Err(UploadError::Io(_))));

        // Prefix is durable, completion was not applied, and the upload resumes
        assert_eq!(engine.query(id).await.unwrap(), UploadStatus::new(3, false));
        let outcome = engine.append(id, 3, true, body(&[b"def"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(UploadStatus::new(6, true)));
    }

    #[tokio::test]
    async fn test_interrupted_create_reports_partial_upload() {
        let (_temp_dir, engine) = local_engine().await;

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ]);
        let err = engine.create(broken, true).await.unwrap_err();

        let created = err.interrupted_upload().expect("partial upload should be reported");
        assert_eq!(created.status, UploadStatus::new(3, false));
        assert_eq!(engine.query(created.id).await.unwrap(), created.status);

        let outcome = engine.append(created.id, 3, true, body(&[b"def"])).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(UploadStatus::new(6, true)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialised() {
        let (_temp_dir, engine) = local_engine().await;
        let id = engine.create(empty(), false).await.unwrap().id;

        let tasks: Vec<_> = [&b"aaaa"[..], b"bbbb"]
            .into_iter()
            .map(|chunk| {
                let engine = engine.clone();
                let chunk = Bytes::copy_from_slice(chunk);
                tokio::spawn(async move {
                    let body = stream::iter(vec![Ok::<_, std::io::Error>(chunk)]);
                    engine.append(id, 0, false, body).await.unwrap()
                })
            })
            .collect();

        let mut appended = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                AppendOutcome::Appended(status) => {
                    assert_eq!(status.offset, 4);
                    appended += 1;
                }
                AppendOutcome::OffsetConflict(status) => {
                    assert_eq!(status.offset, 4);
                    conflicts += 1;
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        assert_eq!((appended, conflicts), (1, 1));
        assert_eq!(engine.query(id).await.unwrap().offset, 4);
    }
}
