//! # Speech Service Client
//!
//! [`SpeechClient`] is the seam between the connection manager and the
//! vendor. [`DeepgramClient`] implements it over a WebSocket:
//!
//! 1. **Handshake**: `GET {base}/v1/listen?{options}` upgraded to WebSocket,
//!    authenticated with `Authorization: Token <key>`
//! 2. **Audio**: binary frames, forwarded as queued
//! 3. **Control**: JSON text frames (`KeepAlive`, `Finalize`, `CloseStream`)
//! 4. **Results**: JSON text frames decoded into [`LiveTranscriptionEvent`]s

use crate::error::{AppError, AppResult};
use crate::live::events::LiveTranscriptionEvent;
use crate::live::options::LiveOptions;
use crate::live::session::{LiveSession, Outbound, SessionDriver};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Default WebSocket base of the hosted service.
pub const DEFAULT_LIVE_URL: &str = "wss://api.deepgram.com";

/// Path used when no endpoint override is given.
pub const DEFAULT_LISTEN_PATH: &str = "v1/listen";

/// Anything that can open a live transcription session.
pub trait SpeechClient: Send + Sync {
    /// Open a live session with `options`, optionally overriding the endpoint.
    ///
    /// Returns immediately with a handle in the `Connecting` state. Must be
    /// called from within a tokio runtime.
    fn listen_live(&self, options: &LiveOptions, endpoint: Option<&str>) -> AppResult<LiveSession>;
}

/// Live transcription client for the hosted speech service.
#[derive(Clone)]
pub struct DeepgramClient {
    api_key: String,
    base_url: Url,
}

impl std::fmt::Debug for DeepgramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl DeepgramClient {
    /// Client against the hosted service.
    pub fn new(api_key: impl Into<String>) -> AppResult<Self> {
        Self::with_base_url(api_key, DEFAULT_LIVE_URL)
    }

    /// Client against a custom `ws://` or `wss://` base, e.g. a self-hosted deployment.
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> AppResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "ws" | "wss") {
            return Err(AppError::ConfigError(format!(
                "live URL must use ws:// or wss://, got {}",
                base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            api_key: api_key.into(),
            base_url,
        })
    }

    /// Resolve the URL a live session connects to.
    ///
    /// ## Endpoint resolution:
    /// - `None`: `{base}/v1/listen`
    /// - absolute `ws://` / `wss://` URL: used as-is
    /// - anything else: a path relative to the base; `:version` expands to `v1`
    pub fn live_url(&self, options: &LiveOptions, endpoint: Option<&str>) -> AppResult<Url> {
        let endpoint = endpoint.map(str::trim).filter(|e| !e.is_empty());

        let mut url = match endpoint {
            Some(absolute) if absolute.starts_with("ws://") || absolute.starts_with("wss://") => {
                Url::parse(absolute)?
            }
            Some(path) => {
                let path = path.replace(":version", "v1");
                self.base_url.join(path.trim_start_matches('/'))?
            }
            None => self.base_url.join(DEFAULT_LISTEN_PATH)?,
        };

        let pairs = options.to_query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    fn handshake_request(&self, url: &Url) -> AppResult<Request> {
        let mut request = url.as_str().into_client_request()?;
        let token = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|_| AppError::Credential("API key is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, token);
        Ok(request)
    }
}

impl SpeechClient for DeepgramClient {
    fn listen_live(&self, options: &LiveOptions, endpoint: Option<&str>) -> AppResult<LiveSession> {
        let url = self.live_url(options, endpoint)?;
        let request = self.handshake_request(&url)?;
        let (session, driver) = LiveSession::channel();

        info!(session_id = %session.id(), url = %redact_query(&url), "opening live session");
        tokio::spawn(drive_session(request, driver));

        Ok(session)
    }
}

/// Log-safe form of a live URL. Options may carry customer data.
fn redact_query(url: &Url) -> String {
    let mut display = url.clone();
    display.set_query(None);
    display.to_string()
}

/// Own the WebSocket for the lifetime of one session.
async fn drive_session(request: Request, mut driver: SessionDriver) {
    let session_id = driver.id();

    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "live session handshake failed");
            driver.emit(LiveTranscriptionEvent::Error(e.to_string()));
            driver.emit(LiveTranscriptionEvent::Close {
                code: None,
                reason: e.to_string(),
            });
            return;
        }
    };

    debug!(session_id = %session_id, "live session open");
    driver.emit(LiveTranscriptionEvent::Open);

    let (mut write, mut read) = stream.split();
    let mut close_code = None;
    let mut close_reason = String::new();

    loop {
        tokio::select! {
            outbound = driver.next_outbound() => {
                let message = match outbound {
                    Some(Outbound::Audio(bytes)) => Message::Binary(bytes),
                    Some(Outbound::Control(control)) => Message::Text(control.to_json()),
                    None => {
                        debug!(session_id = %session_id, "all session handles dropped, closing");
                        close_reason = "session handle dropped".to_string();
                        break;
                    }
                };
                if let Err(e) = write.send(message).await {
                    warn!(session_id = %session_id, error = %e, "failed to send to live session");
                    driver.emit(LiveTranscriptionEvent::Error(e.to_string()));
                    close_reason = e.to_string();
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    driver.emit(LiveTranscriptionEvent::from_server_text(&text));
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.to_string();
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session_id = %session_id, error = %e, "live session read failed");
                    driver.emit(LiveTranscriptionEvent::Error(e.to_string()));
                    close_reason = e.to_string();
                    break;
                }
                None => break,
            }
        }
    }

    // Sends our close frame, or flushes the reply queued for a server close.
    if let Err(e) = write.close().await {
        debug!(session_id = %session_id, error = %e, "closing live socket failed");
    }

    info!(session_id = %session_id, code = ?close_code, reason = %close_reason, "live session closed");
    driver.emit(LiveTranscriptionEvent::Close {
        code: close_code,
        reason: close_reason,
    });
}
