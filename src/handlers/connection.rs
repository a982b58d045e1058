//! # Connection Control Endpoints
//!
//! HTTP consumers of the shared provider. Every handler reads the provider
//! through [`use_transcription`], so these routes must be wrapped in
//! [`crate::middleware::ProvideTranscription`].
//!
//! - `GET    /api/connection`: current status and session id
//! - `POST   /api/connection`: connect with `{"options": {...}, "endpoint": "..."}`;
//!   an empty body connects with default options, a malformed one is rejected
//! - `DELETE /api/connection`: disconnect
//! - `POST   /api/connection/audio`: forward the raw body as audio

use crate::error::{AppError, AppResult};
use crate::live::LiveOptions;
use crate::provider::{use_transcription, TranscriptionProvider};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub options: LiveOptions,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn status_body(provider: &TranscriptionProvider) -> serde_json::Value {
    let connection = provider.connection();
    json!({
        "state": provider.connection_state(),
        "connected": connection.is_some(),
        "session_id": connection.as_ref().map(|s| s.id()),
    })
}

pub async fn connection_status() -> AppResult<HttpResponse> {
    let provider = use_transcription()?;
    Ok(HttpResponse::Ok().json(status_body(&provider)))
}

impl ConnectRequest {
    /// Empty bodies mean "defaults"; anything else must be a valid request.
    fn from_body(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(body)?)
    }
}

pub async fn connect(body: web::Bytes) -> AppResult<HttpResponse> {
    let provider = use_transcription()?;
    let request = ConnectRequest::from_body(&body)?;

    provider
        .connect(request.options, request.endpoint.as_deref())
        .await?;

    Ok(HttpResponse::Accepted().json(status_body(&provider)))
}

pub async fn disconnect() -> AppResult<HttpResponse> {
    let provider = use_transcription()?;
    provider.disconnect().await?;
    Ok(HttpResponse::Ok().json(status_body(&provider)))
}

pub async fn send_audio(body: web::Bytes) -> AppResult<HttpResponse> {
    let provider = use_transcription()?;
    let Some(session) = provider.connection() else {
        return Err(AppError::Conflict("no live session is connected".to_string()));
    };

    let bytes = body.len();
    session.send(body.to_vec())?;
    debug!(session_id = %session.id(), bytes, "forwarded audio");

    Ok(HttpResponse::Accepted().json(json!({
        "session_id": session.id(),
        "bytes": bytes,
    })))
}
