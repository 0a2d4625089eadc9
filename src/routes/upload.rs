//! Upload Routes
//!
//! HTTP endpoints for the resumable upload protocol.
//!
//! Endpoints (relative to the configured base path):
//! - POST / - Create an upload, body is the first chunk
//! - HEAD /:id - Retrieve offset and completion
//! - PATCH /:id - Append a chunk at `Upload-Offset`
//! - OPTIONS /, /:id and any deeper path - Capability probe

use axum::{
    body::Body,
    extract::{OriginalUri, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{head, post},
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::{
    AppendOutcome, UploadError, UploadId, UploadStatus, INTEROP_VERSION, SF_FALSE, SF_TRUE,
    UPLOAD_COMPLETE, UPLOAD_DRAFT_INTEROP_VERSION, UPLOAD_OFFSET,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Upload request failed");
            "Upload storage error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
            details: if cfg!(debug_assertions) && status.is_server_error() {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_upload).options(preflight))
        .route("/:id", head(query_upload).patch(append_upload).options(preflight))
        .fallback(unmatched)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /
///
/// Create an upload. The request body is stored as the first chunk.
async fn create_upload(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, UploadError> {
    let complete = upload_complete(&headers);
    let interop = requests_interop_version(&headers);
    if interop {
        // hyper cannot send 1xx interim responses from a handler, so the
        // version is acknowledged on the final response instead
        tracing::debug!("Client requested interop version {}", INTEROP_VERSION);
    }

    // A body that fails midway still leaves a resumable upload behind; the
    // error response points the client at it.
    let (created, failure) = match state
        .engine()
        .create(body.into_data_stream(), complete)
        .await
    {
        Ok(created) => (created, None),
        Err(e) => match e.interrupted_upload() {
            Some(created) => (created, Some(e)),
            None => return Err(e),
        },
    };

    let location = upload_location(&headers, uri.path(), created.id);
    let location = HeaderValue::from_str(&location)
        .map_err(|_| UploadError::Validation("invalid Host header".to_string()))?;

    tracing::info!(
        upload_id = %created.id,
        location = ?location,
        "Upload created"
    );

    let mut response = match failure {
        None => status_response(StatusCode::CREATED, created.status),
        Some(e) => {
            let mut response = e.into_response();
            set_upload_headers(response.headers_mut(), created.status);
            response
        }
    };
    response.headers_mut().insert(header::LOCATION, location);
    if interop {
        response.headers_mut().insert(
            HeaderName::from_static(UPLOAD_DRAFT_INTEROP_VERSION),
            HeaderValue::from_static(INTEROP_VERSION),
        );
    }

    Ok(response)
}

/// HEAD /:id
///
/// Retrieve the current offset of an upload.
async fn query_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, UploadError> {
    let id = UploadId::parse(&id)?;
    let status = state.engine().query(id).await?;

    Ok(status_response(StatusCode::NO_CONTENT, status))
}

/// PATCH /:id
///
/// Append the request body at `Upload-Offset`.
async fn append_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, UploadError> {
    let id = UploadId::parse(&id)?;
    let complete = upload_complete(&headers);

    let client_offset = match upload_offset(&headers) {
        Ok(offset) => offset,
        Err(e) => {
            // An unknown upload is reported as such whatever the headers say
            state.engine().query(id).await?;
            return Err(e);
        }
    };

    let outcome = state
        .engine()
        .append(id, client_offset, complete, body.into_data_stream())
        .await?;

    Ok(match outcome {
        AppendOutcome::Appended(status) => status_response(StatusCode::CREATED, status),
        AppendOutcome::OffsetConflict(status) => outcome_response(
            StatusCode::CONFLICT,
            status,
            "offset_conflict",
            "mismatching Upload-Offset value",
        ),
        AppendOutcome::AlreadyComplete(status) => outcome_response(
            StatusCode::OK,
            status,
            "already_complete",
            "upload is already complete",
        ),
    })
}

/// OPTIONS
async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Any other path: OPTIONS still succeeds, everything else is unknown
async fn unmatched(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Empty response carrying the upload headers
fn status_response(code: StatusCode, status: UploadStatus) -> Response {
    let mut response = code.into_response();
    set_upload_headers(response.headers_mut(), status);
    response
}

/// Response for append outcomes that did not write anything
fn outcome_response(
    code: StatusCode,
    status: UploadStatus,
    error: &str,
    message: &str,
) -> Response {
    let body = Json(ErrorResponse {
        error: error.to_string(),
        message: message.to_string(),
        details: None,
    });

    let mut response = (code, body).into_response();
    set_upload_headers(response.headers_mut(), status);
    response
}

fn set_upload_headers(headers: &mut HeaderMap, status: UploadStatus) {
    headers.insert(
        HeaderName::from_static(UPLOAD_COMPLETE),
        HeaderValue::from_static(if status.complete { SF_TRUE } else { SF_FALSE }),
    );
    headers.insert(
        HeaderName::from_static(UPLOAD_OFFSET),
        HeaderValue::from(status.offset),
    );
}

/// `Upload-Complete: ?1` marks the final chunk; anything else does not
fn upload_complete(headers: &HeaderMap) -> bool {
    headers
        .get(UPLOAD_COMPLETE)
        .is_some_and(|value| value.as_bytes() == SF_TRUE.as_bytes())
}

/// Parse the required `Upload-Offset` header
fn upload_offset(headers: &HeaderMap) -> Result<u64, UploadError> {
    let value = headers
        .get(UPLOAD_OFFSET)
        .ok_or_else(|| UploadError::Validation("missing Upload-Offset header".to_string()))?;

    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .ok_or_else(|| UploadError::Validation("invalid Upload-Offset header".to_string()))
}

fn requests_interop_version(headers: &HeaderMap) -> bool {
    headers
        .get(UPLOAD_DRAFT_INTEROP_VERSION)
        .is_some_and(|value| value.as_bytes() == INTEROP_VERSION.as_bytes())
}

/// Absolute URL of a new upload, or a path when the request has no Host
fn upload_location(headers: &HeaderMap, request_path: &str, id: UploadId) -> String {
    let path = request_path.trim_end_matches('/');

    match headers.get(header::HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => {
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|proto| proto.to_str().ok())
                .unwrap_or("http");
            format!("{}://{}{}/{}", scheme, host, path, id)
        }
        None => format!("{}/{}", path, id),
    }
}

// ============================================================================
// Tests
// ============================================================================
