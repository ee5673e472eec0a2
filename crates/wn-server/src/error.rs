//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`wn_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and still produce the structured error
//! body clients rely on.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use wn_core::Error;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
    request_id: Option<String>,
}

/// Error response body.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `UNSUPPORTED_FORMAT`.
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn inner(&self) -> &Error {
        &self.inner
    }

    /// Stable code for the underlying error.
    pub fn code(&self) -> &'static str {
        error_code(&self.inner)
    }
}

/// Map an error to the code reported in the response body.
pub fn error_code(err: &Error) -> &'static str {
    match err.root() {
        Error::InvalidForm(_) => "INVALID_FORM",
        Error::NoFile => "NO_FILE",
        Error::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
        Error::FileTooLarge { .. } => "FILE_TOO_LARGE",
        Error::ReadFailed(_) => "READ_FAILED",
        Error::Io { .. } => "FS_ERROR",
        Error::Tool { .. }
        | Error::JobIo { .. }
        | Error::EmptyOutput { .. }
        | Error::TimedOut { .. }
        | Error::Canceled => "FFMPEG_FAILED",
        Error::ClaimTimeout { .. } => "CLAIM_TIMEOUT",
        Error::Shared(_) | Error::Config(_) | Error::Internal(_) => "INTERNAL",
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code,
                request_id = self.request_id.as_deref().unwrap_or("-"),
                error = %self.inner,
                "Server error in API handler"
            );
        } else {
            tracing::debug!(status = %status, code, error = %self.inner, "Rejected request");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.inner.to_string(),
                request_id: self.request_id,
            },
        };

        (status, axum::Json(body)).into_response()
    }
}
