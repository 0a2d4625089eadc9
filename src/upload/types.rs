//! Upload types for the resumable upload protocol

use std::fmt;

use uuid::Uuid;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Draft interop version this server speaks
pub const INTEROP_VERSION: &str = "4";

/// Extension of the sidecar file marking an upload as incomplete
pub const INCOMPLETE_EXT: &str = "incomplete";

/// Request/response header carrying the byte offset
pub const UPLOAD_OFFSET: &str = "upload-offset";

/// Request/response header carrying the completion flag
pub const UPLOAD_COMPLETE: &str = "upload-complete";

/// Header used to opt into the draft interop version
pub const UPLOAD_DRAFT_INTEROP_VERSION: &str = "upload-draft-interop-version";

/// Structured field value for `true`
pub const SF_TRUE: &str = "?1";

/// Structured field value for `false`
pub const SF_FALSE: &str = "?0";

// ============================================================================
// Upload Identity
// ============================================================================

/// Unique identifier of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier taken from a request path.
    ///
    /// Anything that is not a UUID cannot name an upload, so it is reported
    /// as not found rather than as a malformed request.
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| UploadError::NotFound(raw.to_string()))
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

// ============================================================================
// Upload State
// ============================================================================

/// Authoritative server-side state of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    /// Bytes durably accepted so far
    pub offset: u64,

    /// Whether the final chunk has been received
    pub complete: bool,
}

impl UploadStatus {
    pub fn new(offset: u64, complete: bool) -> Self {
        Self { offset, complete }
    }
}

/// Result of creating an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadCreated {
    pub id: UploadId,
    pub status: UploadStatus,
}

/// Result of an append request that reached an existing upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Bytes were written; carries the new state
    Appended(UploadStatus),

    /// Client offset disagreed with the server; nothing was written
    OffsetConflict(UploadStatus),

    /// The upload was already finished; nothing was written
    AlreadyComplete(UploadStatus),
}

impl AppendOutcome {
    /// Server state reported alongside the outcome
    pub fn status(&self) -> UploadStatus {
        match self {
            Self::Appended(status) | Self::OffsetConflict(status) | Self::AlreadyComplete(status) => {
                *status
            }
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Failed to allocate upload {id}: {source}")]
    Allocation {
        id: UploadId,
        #[source]
        source: std::io::Error,
    },

    #[error("Completion marker missing for upload {0}")]
    MarkerNotFound(UploadId),

    #[error("Upload {0} has a completion marker but no data")]
    Corrupted(UploadId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The body of a create request failed after the upload was allocated.
    /// The written prefix is kept and can be resumed.
    #[error("Upload {} interrupted at offset {}: {source}", .created.id, .created.status.offset)]
    Interrupted {
        created: UploadCreated,
        #[source]
        source: Box<UploadError>,
    },
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Allocation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MarkerNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Corrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Interrupted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "bad_request",
            Self::Allocation { .. } => "allocation_error",
            Self::MarkerNotFound(_) => "marker_not_found",
            Self::Corrupted(_) => "corrupted_upload",
            Self::Io(_) => "io_error",
            Self::Interrupted { .. } => "upload_interrupted",
        }
    }

    /// The partially written upload, if this error left one behind
    pub fn interrupted_upload(&self) -> Option<UploadCreated> {
        match self {
            Self::Interrupted { created, .. } => Some(*created),
            _ => None,
        }
    }
}
