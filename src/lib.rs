//! # live-transcribe
//!
//! Exposes a live speech-transcription connection to its consumers: fetches a
//! short-lived credential, opens a streaming session with the speech service,
//! tracks whether that session is open, and shares connect/disconnect plus the
//! current connection through a cloneable provider.
//!
//! ## Layout:
//! - **credential**: fetches the API key from a credential endpoint
//! - **live**: the speech service client, live session handle and events
//! - **provider**: the connection manager and its task-scoped shared context
//! - **config / error / state**: ambient plumbing for the HTTP server
//! - **handlers / health / middleware**: the HTTP surface served by the binary

pub mod config;
pub mod credential;
pub mod error;
pub mod handlers;
pub mod health;
pub mod live;
pub mod middleware;
pub mod provider;
pub mod state;

#[cfg(test)]
mod test_support;

pub use error::{AppError, AppResult};
pub use live::{LiveEventKind, LiveOptions, LiveSession, LiveTranscriptionEvent};
pub use provider::{scope, use_transcription, ConnectionState, TranscriptionProvider};
