//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (HOST, PORT, DEEPGRAM_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_DEEPGRAM__API_KEY, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Why `__` as the separator:
//! Field names such as `api_key` contain underscores themselves, so a single `_`
//! separator would split `APP_DEEPGRAM_API_KEY` into `deepgram.api.key`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Breaking configuration into logical groups (server, credential, deepgram)
/// keeps each concern small and easy to override from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub credential: CredentialConfig,
    pub deepgram: DeepgramConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where the connection manager obtains its short-lived API key.
///
/// Left empty, this points back at this server's own `/api/authenticate`
/// route on the configured host and port. Any endpoint that answers
/// `{"key": "..."}` works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub url: String,
}

/// Speech-recognition service settings.
///
/// ## Fields:
/// - `api_key`: Long-lived key served (or used to mint temporary keys) by `/api/authenticate`
/// - `fallback_api_key`: Used by `connect` when the credential endpoint yields no key
/// - `project_id`: When set, `/api/authenticate` mints a temporary key for this project
/// - `live_url`: Base WebSocket URL for live sessions
/// - `management_url`: Base HTTPS URL for the key management API
/// - `key_ttl_seconds`: Lifetime of minted keys
///
/// Empty strings mean "not set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepgramConfig {
    pub api_key: String,
    pub fallback_api_key: String,
    pub project_id: String,
    pub live_url: String,
    pub management_url: String,
    pub key_ttl_seconds: u64,
}

impl DeepgramConfig {
    /// The configured long-lived key, if any.
    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    /// The key `connect` falls back to, if any.
    pub fn fallback_api_key(&self) -> Option<&str> {
        non_empty(&self.fallback_api_key)
    }

    /// The project to mint temporary keys for, if any.
    pub fn project_id(&self) -> Option<&str> {
        non_empty(&self.project_id)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Provides default configuration values.
///
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            credential: CredentialConfig {
                url: String::new(),
            },
            deepgram: DeepgramConfig {
                api_key: String::new(),
                fallback_api_key: String::new(),
                project_id: String::new(),
                live_url: "wss://api.deepgram.com".to_string(),
                management_url: "https://api.deepgram.com".to_string(),
                key_ttl_seconds: 60,
            },
        }
    }
}

impl AppConfig {
    /// The credential endpoint `connect` fetches from.
    ///
    /// An explicit `credential.url` wins; otherwise the server's own
    /// authenticate route, reached over loopback when bound to a wildcard.
    pub fn credential_url(&self) -> String {
        if let Some(url) = non_empty(&self.credential.url) {
            return url.to_string();
        }

        let host = match self.server.host.trim() {
            "" | "0.0.0.0" | "::" | "[::]" => "127.0.0.1".to_string(),
            host if host.contains(':') && !host.starts_with('[') => format!("[{}]", host),
            host => host.to_string(),
        };
        format!("http://{}:{}/api/authenticate", host, self.server.port)
    }

    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and DEEPGRAM_API_KEY
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_CREDENTIAL__URL=http://auth.internal/api/authenticate`
    /// - `APP_DEEPGRAM__PROJECT_ID=...`: Enable temporary key minting
    /// - `DEEPGRAM_API_KEY=...`: Special case matching the vendor's own convention
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("deepgram.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Credential URL (explicit or derived) parses
    /// - Live URL is a `ws://` or `wss://` URL
    /// - Minted key lifetime is greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        url::Url::parse(&self.credential_url())
            .map_err(|e| anyhow::anyhow!("Credential URL is invalid: {}", e))?;

        let live = url::Url::parse(&self.deepgram.live_url)
            .map_err(|e| anyhow::anyhow!("Live URL is invalid: {}", e))?;
        if !matches!(live.scheme(), "ws" | "wss") {
            return Err(anyhow::anyhow!(
                "Live URL must use ws:// or wss://, got {}://",
                live.scheme()
            ));
        }

        if self.deepgram.key_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("Key TTL must be greater than 0"));
        }

        Ok(())
    }
}
