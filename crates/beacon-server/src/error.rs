//! HTTP error responses.
//!
//! Every error renders as `{"error": "<message>"}` with a matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_core::HubError;
use beacon_protocol::ErrorPayload;
use thiserror::Error;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request validation failed.
    #[error("{0}")]
    BadRequest(String),

    /// The location hub is not running.
    #[error("Location hub is not available")]
    ServiceUnavailable,
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        match error {
            HubError::Unavailable => ApiError::ServiceUnavailable,
        }
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }
        (status, Json(ErrorPayload::new(self.to_string()))).into_response()
    }
}
