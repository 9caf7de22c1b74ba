//! HTTP error responses
//!
//! Converts store failures into status codes with a JSON `{"error": ...}`
//! body. Internal failures are logged and reported generically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::store::StoreError;

/// Error returned by request handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Missing required query parameter: name")]
    MissingName,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Map an error to the HTTP status reported to clients
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Store(e) => match e {
                StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                StoreError::InvalidName(_) => StatusCode::BAD_REQUEST,
                StoreError::Io { .. } | StoreError::Initialization { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::MissingName => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
