//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data`.
//!
//! ## Arc vs. interior locking:
//! - **config**: read-only after startup, so a plain `Arc` is enough
//! - **provider**: already a cloneable handle with its own locking
//! - **http**: `reqwest::Client` is internally reference counted

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::provider::TranscriptionProvider;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// The connection manager shared by all consumers.
    pub provider: TranscriptionProvider,

    /// Pooled HTTP client for credential fetches and key minting.
    pub http: reqwest::Client,

    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    /// Build state whose provider fetches credentials and opens sessions per `config`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::new();
        let provider = TranscriptionProvider::from_config(&config, http.clone())?;
        Ok(Self::with_provider(config, provider, http))
    }

    /// Build state around an existing provider.
    pub fn with_provider(
        config: AppConfig,
        provider: TranscriptionProvider,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            http,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
