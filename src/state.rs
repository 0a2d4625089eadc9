//! Application state management

use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::upload::{LocalUploadStore, MemoryUploadStore, UploadEngine, UploadError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub engine: UploadEngine,
}

impl AppState {
    /// Create a new application state
    ///
    /// Provisions the storage root for the local backend; failure to create
    /// it is fatal.
    pub async fn new(config: Config) -> Result<Self, UploadError> {
        let engine = match config.storage.backend {
            StorageBackend::Local => {
                let store = LocalUploadStore::new(&config.storage.path).await?;
                tracing::info!(path = %config.storage.path.display(), "Using local upload storage");
                UploadEngine::new(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory upload storage; uploads are lost on restart");
                UploadEngine::new(MemoryUploadStore::new())
            }
        };

        Ok(Self::with_engine(config, engine))
    }

    /// Create state around an existing engine
    pub fn with_engine(config: Config, engine: UploadEngine) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, engine }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload engine
    pub fn engine(&self) -> &UploadEngine {
        &self.inner.engine
    }
}
