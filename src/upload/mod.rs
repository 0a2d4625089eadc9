//! Resumable Upload Module
//!
//! Implements the draft HTTP resumable upload protocol with:
//! - Offset-checked appends that can resume after any interruption
//! - Completion tracked by a sidecar marker rather than in the payload
//! - Per-upload serialisation of writers
//!
//! Protocol Flow:
//! 1. Client creates an upload, optionally sending the first chunk
//! 2. Server responds with the upload location and accepted offset
//! 3. Client appends further chunks at the current offset
//! 4. After an interruption the client queries the offset and resumes
//! 5. The chunk flagged as final completes the upload

pub mod engine;
pub mod local_store;
pub mod locks;
pub mod memory_store;
pub mod store;
pub mod types;

pub use engine::UploadEngine;
pub use local_store::LocalUploadStore;
pub use locks::{KeyGuard, KeyedLocks};
pub use memory_store::MemoryUploadStore;
pub use store::{DynUploadStore, UploadHandle, UploadSink, UploadStore};
pub use types::*;
