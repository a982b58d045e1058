//! # Error Handling
//!
//! This module defines the crate's error type and how it's converted to HTTP responses.
//!
//! ## Error Categories:
//! - Failures talking to the credential endpoint or the speech service (`Upstream`)
//! - No API key could be obtained at all (`Credential`)
//! - Using a live session after it closed (`SessionClosed`)
//! - Reading the shared provider context outside its scope (`OutsideProvider`)
//! - The usual request/config/internal buckets
//!
//! Every variant carries a human-readable message. `OutsideProvider` carries
//! a fixed one since it is the module's documented failure signal.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Message returned when the shared provider context is read outside its scope.
pub const OUTSIDE_PROVIDER_MESSAGE: &str =
    "use_transcription must be used within a TranscriptionProvider scope";

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// use live_transcribe::error::AppError;
/// let err = AppError::BadRequest("Invalid JSON".to_string());
/// assert_eq!(err.to_string(), "Bad request: Invalid JSON");
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Unexpected internal failures
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// The request conflicts with the current connection state
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// No usable API key could be obtained
    Credential(String),

    /// The credential endpoint or the speech service failed
    Upstream(String),

    /// The live session has already closed
    SessionClosed,

    /// The shared provider context was read outside its scope
    OutsideProvider,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Credential(msg) => write!(f, "Credential error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::SessionClosed => write!(f, "Live session is closed"),
            AppError::OutsideProvider => write!(f, "{}", OUTSIDE_PROVIDER_MESSAGE),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "upstream_error",
///     "message": "Upstream error: connection refused",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(_) | AppError::ConfigError(_) | AppError::OutsideProvider => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::SessionClosed => StatusCode::CONFLICT,
            AppError::Credential(_) | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_type = match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::ConfigError(_) => "config_error",
            AppError::Credential(_) => "credential_error",
            AppError::Upstream(_) => "upstream_error",
            AppError::SessionClosed => "session_closed",
            AppError::OutsideProvider => "outside_provider",
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON errors are almost always malformed client input.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::ConfigError(format!("invalid URL: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
