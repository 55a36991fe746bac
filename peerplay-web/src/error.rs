//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use peerplay_core::SessionError;
use serde::Serialize;

/// Client-facing failure of an API call.
///
/// Every session error is a bad request; the body carries the status code,
/// its reason phrase and a human readable message.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] SessionError);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.0.is_user_error() {
            tracing::debug!("Rejected request: {}", self.0);
        } else {
            tracing::warn!("Request failed: {}", self.0);
        }

        let body = ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Bad Request"),
            message: self.0.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Failures that stop the HTTP server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server on {addr} failed")]
    Serve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
