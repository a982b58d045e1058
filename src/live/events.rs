//! Events emitted by a live transcription session.
//!
//! Server messages arrive as JSON text frames tagged by `type`. Only the
//! fields consumers actually read are decoded into typed structs; the raw
//! payload is kept alongside so nothing is lost.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription key for [`LiveTranscriptionEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveEventKind {
    Open,
    Close,
    Transcript,
    Metadata,
    UtteranceEnd,
    SpeechStarted,
    Error,
    Unhandled,
}

/// An event delivered to listeners registered on a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveTranscriptionEvent {
    /// The streaming connection finished its handshake.
    Open,
    /// The streaming connection ended. Emitted exactly once per session.
    Close { code: Option<u16>, reason: String },
    /// A (partial or final) transcription result.
    Transcript(TranscriptEvent),
    Metadata(Value),
    UtteranceEnd(Value),
    SpeechStarted(Value),
    /// A transport or protocol failure. Usually followed by `Close`.
    Error(String),
    /// A message this client does not recognize.
    Unhandled(Value),
}

impl LiveTranscriptionEvent {
    pub fn kind(&self) -> LiveEventKind {
        match self {
            LiveTranscriptionEvent::Open => LiveEventKind::Open,
            LiveTranscriptionEvent::Close { .. } => LiveEventKind::Close,
            LiveTranscriptionEvent::Transcript(_) => LiveEventKind::Transcript,
            LiveTranscriptionEvent::Metadata(_) => LiveEventKind::Metadata,
            LiveTranscriptionEvent::UtteranceEnd(_) => LiveEventKind::UtteranceEnd,
            LiveTranscriptionEvent::SpeechStarted(_) => LiveEventKind::SpeechStarted,
            LiveTranscriptionEvent::Error(_) => LiveEventKind::Error,
            LiveTranscriptionEvent::Unhandled(_) => LiveEventKind::Unhandled,
        }
    }

    /// Decode a text frame received from the speech service.
    ///
    /// Text that is not JSON is surfaced as `Unhandled` carrying the raw string.
    pub fn from_server_text(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => return LiveTranscriptionEvent::Unhandled(Value::String(text.to_string())),
        };

        match value.get("type").and_then(Value::as_str) {
            Some("Results") => match serde_json::from_value::<ResultsMessage>(value.clone()) {
                Ok(results) => LiveTranscriptionEvent::Transcript(results.into_event(value)),
                Err(_) => LiveTranscriptionEvent::Unhandled(value),
            },
            Some("Metadata") => LiveTranscriptionEvent::Metadata(value),
            Some("UtteranceEnd") => LiveTranscriptionEvent::UtteranceEnd(value),
            Some("SpeechStarted") => LiveTranscriptionEvent::SpeechStarted(value),
            _ => LiveTranscriptionEvent::Unhandled(value),
        }
    }
}

/// The best alternative of a `Results` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEvent {
    pub transcript: String,
    pub confidence: f64,
    pub is_final: bool,
    pub speech_final: bool,
    pub start: f64,
    pub duration: f64,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct ResultsMessage {
    #[serde(default)]
    channel: ResultsChannel,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ResultsChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

impl ResultsMessage {
    fn into_event(self, raw: Value) -> TranscriptEvent {
        let (transcript, confidence) = self
            .channel
            .alternatives
            .into_iter()
            .next()
            .map(|alt| (alt.transcript, alt.confidence))
            .unwrap_or_default();

        TranscriptEvent {
            transcript,
            confidence,
            is_final: self.is_final,
            speech_final: self.speech_final,
            start: self.start,
            duration: self.duration,
            raw,
        }
    }
}
