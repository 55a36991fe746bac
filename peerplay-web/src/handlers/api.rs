//! Session and player control endpoints

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use bytes::Bytes;
use peerplay_core::PlaybackStatus;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub port: u16,
}

impl PlayRequest {
    /// Reads the request from a JSON or form-encoded body.
    ///
    /// Anything unparseable yields a request without a URL.
    pub fn from_body(headers: &HeaderMap, body: &[u8]) -> Self {
        let is_form = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let url = url::form_urlencoded::parse(body)
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned());
            return Self { url };
        }

        serde_json::from_slice(body).unwrap_or(Self { url: None })
    }
}

pub async fn play(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PlayResponse>, ApiError> {
    let request = PlayRequest::from_body(&headers, &body);
    let locator = request.url.unwrap_or_default();

    let port = state.controller.start_session(&locator).await?;
    Ok(Json(PlayResponse { port }))
}

pub async fn stop(State(state): State<AppState>) -> StatusCode {
    state.controller.stop_session().await;
    StatusCode::OK
}

pub async fn status(State(state): State<AppState>) -> Json<PlaybackStatus> {
    Json(state.controller.status())
}

pub async fn command(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.send_command(&name).await?;
    Ok(StatusCode::OK)
}
