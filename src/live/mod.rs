//! # Live Transcription Client
//!
//! The client surface the connection manager needs from the speech service:
//! building a client from an API key, opening a live session with arbitrary
//! options, subscribing to session events, streaming audio and finishing the
//! session gracefully.
//!
//! ## Key Components:
//! - **client**: `SpeechClient` trait and the WebSocket-backed `DeepgramClient`
//! - **session**: `LiveSession` handle and its transport-side `SessionDriver`
//! - **events**: `LiveTranscriptionEvent` and decoding of server messages
//! - **options**: `LiveOptions`, passed through as query parameters

pub mod client;
pub mod events;
pub mod options;
pub mod session;

pub use client::{DeepgramClient, SpeechClient};
pub use events::{LiveEventKind, LiveTranscriptionEvent, TranscriptEvent};
pub use options::LiveOptions;
pub use session::{ControlMessage, LiveSession, Outbound, ReadyState, SessionDriver};
