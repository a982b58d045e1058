//! # Credential Fetcher
//!
//! Obtains the short-lived API key used to open live sessions.
//!
//! ## Contract:
//! - One `GET` per call, sent with `Cache-Control: no-store`, no retry
//! - Transport failures propagate as [`AppError::Upstream`]
//! - A response that is not JSON, or has no non-empty string `key`, yields
//!   `Ok(None)` with a warning. It is never surfaced as an error.

use crate::error::AppResult;
use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Source of API keys for the connection manager.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch_api_key(&self) -> AppResult<Option<String>>;
}

/// Fetches keys from an HTTP credential endpoint answering `{"key": "..."}`.
#[derive(Debug, Clone)]
pub struct CredentialFetcher {
    client: reqwest::Client,
    url: Url,
}

impl CredentialFetcher {
    pub fn new(url: &str) -> AppResult<Self> {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Share an existing HTTP client (connection pool) with the fetcher.
    pub fn with_client(client: reqwest::Client, url: &str) -> AppResult<Self> {
        Ok(Self {
            client,
            url: Url::parse(url)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl CredentialSource for CredentialFetcher {
    async fn fetch_api_key(&self) -> AppResult<Option<String>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        debug!(url = %self.url, status = %status, bytes = body.len(), "credential response received");

        let key = extract_key(&body);
        if key.is_none() {
            warn!(url = %self.url, status = %status, "credential response carried no usable key");
        }
        Ok(key)
    }
}

fn extract_key(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("key")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// A fixed credential, for deployments that inject the key directly.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(pub Option<String>);

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn fetch_api_key(&self) -> AppResult<Option<String>> {
        Ok(self.0.clone())
    }
}
