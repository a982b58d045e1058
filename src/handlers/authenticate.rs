//! # Credential Endpoint
//!
//! `GET /api/authenticate` hands browsers and other consumers a key for the
//! speech service, so the long-lived key never leaves the server.
//!
//! ## Key selection:
//! - `deepgram.project_id` set: mint a temporary key through the management API
//!   (`POST /v1/projects/{id}/keys`) valid for `deepgram.key_ttl_seconds`
//! - otherwise: return the configured `deepgram.api_key` as-is
//!
//! Responses are always sent with `Cache-Control: no-store`.

use crate::config::DeepgramConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::http::header::CACHE_CONTROL;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct CreateKeyRequest<'a> {
    comment: &'a str,
    scopes: [&'a str; 1],
    time_to_live_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct CreateKeyResponse {
    key: String,
    #[serde(default)]
    api_key_id: Option<String>,
}

pub async fn authenticate(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let deepgram = &state.get_config().deepgram;

    let Some(api_key) = deepgram.api_key() else {
        return Err(AppError::ConfigError(
            "no speech service API key is configured".to_string(),
        ));
    };

    let key = match deepgram.project_id() {
        Some(project_id) => mint_temporary_key(&state.http, deepgram, project_id, api_key).await?,
        None => {
            debug!("serving configured API key");
            api_key.to_string()
        }
    };

    Ok(HttpResponse::Ok()
        .insert_header((CACHE_CONTROL, "no-store"))
        .json(json!({ "key": key })))
}

async fn mint_temporary_key(
    http: &reqwest::Client,
    deepgram: &DeepgramConfig,
    project_id: &str,
    api_key: &str,
) -> AppResult<String> {
    let url = format!(
        "{}/v1/projects/{}/keys",
        deepgram.management_url.trim_end_matches('/'),
        project_id
    );
    let request = CreateKeyRequest {
        comment: "live-transcribe temporary key",
        scopes: ["usage:write"],
        time_to_live_in_seconds: deepgram.key_ttl_seconds,
    };

    let response = http
        .post(&url)
        .header(reqwest::header::AUTHORIZATION, format!("Token {}", api_key))
        .json(&request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!(
            "key minting failed with {}: {}",
            status, error_text
        )));
    }

    let created: CreateKeyResponse = response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("unexpected key minting response: {}", e)))?;

    info!(
        project_id = %project_id,
        api_key_id = created.api_key_id.as_deref().unwrap_or("unknown"),
        ttl_seconds = deepgram.key_ttl_seconds,
        "minted temporary API key"
    );
    Ok(created.key)
}
