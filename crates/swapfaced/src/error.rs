use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use swapface_core::{ErrorKind, ProcessError};
use thiserror::Error;

/// Failures of an HTTP request, rendered as `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("malformed upload: {0}")]
    BadUpload(String),
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn from_multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadUpload(err.body_text())
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Process(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::Decode => StatusCode::BAD_REQUEST,
                ErrorKind::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::NoFaceInSource | ErrorKind::NoFaceInTarget | ErrorKind::Unexpected => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
