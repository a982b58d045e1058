//! # Transcription Provider
//!
//! The connection manager: owns at most one live session plus its
//! open/closed status, and shares both with every consumer that holds a
//! clone of the provider.
//!
//! ## Operations:
//! - `connect(options, endpoint)`: fetch a key, build a client, open a session,
//!   flip the status on its `Open`/`Close` events
//! - `disconnect()`: finish the current session, if any, and release it
//! - `connection()` / `connection_state()`: read the current handle and status
//!
//! ## Shared context:
//! [`scope`] installs a provider as task-local context for a future, and
//! [`use_transcription`] reads it back. Reading outside a scope fails with
//! [`AppError::OutsideProvider`].
//!
//! ## Status rules:
//! The status only changes through session events. An event from a session
//! that has since been replaced by a newer `connect` is ignored; a `Close`
//! from a session released by `disconnect` still applies.

use crate::config::AppConfig;
use crate::credential::{CredentialFetcher, CredentialSource};
use crate::error::{AppError, AppResult};
use crate::live::{DeepgramClient, LiveEventKind, LiveOptions, LiveSession, SpeechClient};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Open/closed status of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Open,
    #[default]
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Open => "OPEN",
            ConnectionState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a speech client for a given API key.
pub type ClientFactory = Arc<dyn Fn(&str) -> AppResult<Arc<dyn SpeechClient>> + Send + Sync>;

/// Factory producing [`DeepgramClient`]s against `live_url`.
pub fn deepgram_factory(live_url: &str) -> AppResult<ClientFactory> {
    // Fail on a bad base URL now rather than on the first connect.
    DeepgramClient::with_base_url("", live_url)?;
    let live_url = live_url.to_string();

    Ok(Arc::new(move |api_key: &str| -> AppResult<Arc<dyn SpeechClient>> {
        let client = DeepgramClient::with_base_url(api_key, &live_url)?;
        Ok(Arc::new(client) as Arc<dyn SpeechClient>)
    }))
}

struct ProviderInner {
    credentials: Arc<dyn CredentialSource>,
    client_factory: ClientFactory,
    fallback_api_key: Option<String>,
    /// Serializes connect/disconnect.
    operation: tokio::sync::Mutex<()>,
    /// Never held across an await.
    connection: Mutex<Option<LiveSession>>,
    state: watch::Sender<ConnectionState>,
}

impl ProviderInner {
    fn connection(&self) -> MutexGuard<'_, Option<LiveSession>> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_session_id(&self) -> Option<Uuid> {
        self.connection().as_ref().map(LiveSession::id)
    }

    fn apply(&self, session_id: Uuid, next: ConnectionState) {
        let current = self.current_session_id();
        let applies = match next {
            ConnectionState::Open => current == Some(session_id),
            ConnectionState::Closed => current.is_none() || current == Some(session_id),
        };

        if applies {
            let previous = self.state.send_replace(next);
            if previous != next {
                info!(session_id = %session_id, state = %next, "connection state changed");
            }
        } else {
            debug!(session_id = %session_id, state = %next, "ignoring event from superseded session");
        }
    }
}

/// Cloneable handle to the shared connection state.
#[derive(Clone)]
pub struct TranscriptionProvider {
    inner: Arc<ProviderInner>,
}

impl fmt::Debug for TranscriptionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionProvider")
            .field("connection", &self.connection())
            .field("connection_state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl TranscriptionProvider {
    /// ## Parameters:
    /// - **credentials**: where `connect` gets its API key
    /// - **client_factory**: builds a speech client from that key
    /// - **fallback_api_key**: used when the credential source yields no key
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        client_factory: ClientFactory,
        fallback_api_key: Option<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            inner: Arc::new(ProviderInner {
                credentials,
                client_factory,
                fallback_api_key,
                operation: tokio::sync::Mutex::new(()),
                connection: Mutex::new(None),
                state,
            }),
        }
    }

    /// Provider fetching keys from the credential URL and connecting to `deepgram.live_url`.
    pub fn from_config(config: &AppConfig, http: reqwest::Client) -> AppResult<Self> {
        let credentials = CredentialFetcher::with_client(http, &config.credential_url())?;
        let factory = deepgram_factory(&config.deepgram.live_url)?;
        Ok(Self::new(
            Arc::new(credentials),
            factory,
            config.deepgram.fallback_api_key().map(str::to_string),
        ))
    }

    /// Open a live session and make it the current connection.
    ///
    /// `options` are passed through unvalidated. A session already held is
    /// finished and replaced.
    pub async fn connect(&self, options: LiveOptions, endpoint: Option<&str>) -> AppResult<()> {
        let _operation = self.inner.operation.lock().await;

        let api_key = self.resolve_api_key().await?;
        let client = (self.inner.client_factory)(&api_key)?;
        let session = client.listen_live(&options, endpoint)?;
        let session_id = session.id();

        // Become current before listening, so a replayed Open is not mistaken
        // for an event from a superseded session.
        let previous = self.inner.connection().replace(session.clone());
        if let Some(previous) = previous {
            warn!(
                previous = %previous.id(),
                session_id = %session_id,
                "connect called while a session is held; finishing the previous session"
            );
            if let Err(e) = previous.finish() {
                warn!(previous = %previous.id(), error = %e, "failed to finish previous session");
            }
        }

        self.listen(&session, LiveEventKind::Open, ConnectionState::Open);
        self.listen(&session, LiveEventKind::Close, ConnectionState::Closed);

        info!(session_id = %session_id, endpoint = ?endpoint, "live session requested");
        Ok(())
    }

    /// Finish and release the current session. No-op without one.
    ///
    /// The handle is released even when finishing fails.
    pub async fn disconnect(&self) -> AppResult<()> {
        let _operation = self.inner.operation.lock().await;

        let Some(session) = self.inner.connection().take() else {
            debug!("disconnect without a live session");
            return Ok(());
        };

        info!(session_id = %session.id(), "finishing live session");
        session.finish()
    }

    /// The current session handle, if any.
    pub fn connection(&self) -> Option<LiveSession> {
        self.inner.connection().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch the status; receivers are notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Run `future` with this provider as its shared context.
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        scope(self.clone(), future).await
    }

    async fn resolve_api_key(&self) -> AppResult<String> {
        if let Some(key) = self.inner.credentials.fetch_api_key().await? {
            return Ok(key);
        }

        match &self.inner.fallback_api_key {
            Some(key) => {
                warn!("credential endpoint returned no key, using fallback key");
                Ok(key.clone())
            }
            None => Err(AppError::Credential(
                "credential endpoint returned no key and no fallback key is configured".to_string(),
            )),
        }
    }

    fn listen(&self, session: &LiveSession, kind: LiveEventKind, next: ConnectionState) {
        // Weak: the session's listeners must not keep the provider alive.
        let inner: Weak<ProviderInner> = Arc::downgrade(&self.inner);
        let session_id = session.id();
        session.add_listener(kind, move |_| {
            if let Some(inner) = inner.upgrade() {
                inner.apply(session_id, next);
            }
        });
    }
}

tokio::task_local! {
    static CURRENT_PROVIDER: TranscriptionProvider;
}

/// Run `future` with `provider` installed as the shared context value.
pub async fn scope<F: Future>(provider: TranscriptionProvider, future: F) -> F::Output {
    CURRENT_PROVIDER.scope(provider, future).await
}

/// The provider of the enclosing [`scope`].
pub fn use_transcription() -> AppResult<TranscriptionProvider> {
    CURRENT_PROVIDER
        .try_with(TranscriptionProvider::clone)
        .map_err(|_| AppError::OutsideProvider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::StaticCredential;
    use crate::error::OUTSIDE_PROVIDER_MESSAGE;
    use crate::live::{ControlMessage, LiveTranscriptionEvent, Outbound};
    use crate::test_support::{mock_factory, mock_provider};

    fn close_event() -> LiveTranscriptionEvent {
        LiveTranscriptionEvent::Close {
            code: Some(1000),
            reason: String::new(),
        }
    }

    #[test]
    fn test_connection_state_strings() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Closed).unwrap(),
            r#""CLOSED""#
        );
    }

    #[tokio::test]
    async fn test_status_follows_open_and_close_events() {
        let (provider, opened) = mock_provider(Some("key-1"));
        assert_eq!(provider.connection_state(), ConnectionState::Closed);
        assert!(provider.connection().is_none());

        let options = LiveOptions::new().with("model", "nova-2");
        provider.connect(options.clone(), None).await.unwrap();
        assert!(provider.connection().is_some());
        assert_eq!(provider.connection_state(), ConnectionState::Closed);

        {
            let opened = opened.lock().unwrap();
            assert_eq!(opened.len(), 1);
            assert_eq!(opened[0].api_key, "key-1");
            assert_eq!(opened[0].options, options);
            opened[0].driver.emit(LiveTranscriptionEvent::Open);
        }
        assert_eq!(provider.connection_state(), ConnectionState::Open);

        opened.lock().unwrap()[0].driver.emit(close_event());
        assert_eq!(provider.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let (provider, opened) = mock_provider(Some("key"));
        provider.disconnect().await.unwrap();
        assert!(provider.connection().is_none());
        assert_eq!(provider.connection_state(), ConnectionState::Closed);
        assert!(opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_finishes_and_releases() {
        let (provider, opened) = mock_provider(Some("key"));
        provider.connect(LiveOptions::new(), Some("v1/listen")).await.unwrap();
        opened.lock().unwrap()[0].driver.emit(LiveTranscriptionEvent::Open);

        provider.disconnect().await.unwrap();
        assert!(provider.connection().is_none());

        let mut opened = opened.lock().unwrap();
        assert_eq!(opened[0].endpoint.as_deref(), Some("v1/listen"));
        assert_eq!(
            opened[0].driver.try_next_outbound(),
            Some(Outbound::Control(ControlMessage::CloseStream))
        );

        // Status only drops once the released session reports its close.
        assert_eq!(provider.connection_state(), ConnectionState::Open);
        opened[0].driver.emit(close_event());
        assert_eq!(provider.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_second_connect_supersedes_first() {
        let (provider, opened) = mock_provider(Some("key"));
        provider.connect(LiveOptions::new(), None).await.unwrap();
        opened.lock().unwrap()[0].driver.emit(LiveTranscriptionEvent::Open);

        provider.connect(LiveOptions::new(), None).await.unwrap();
        let mut sessions = opened.lock().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(
            provider.connection().map(|s| s.id()),
            Some(sessions[1].driver.id())
        );
        assert_eq!(
            sessions[0].driver.try_next_outbound(),
            Some(Outbound::Control(ControlMessage::CloseStream))
        );

        sessions[1].driver.emit(LiveTranscriptionEvent::Open);
        sessions[0].driver.emit(close_event());
        assert_eq!(provider.connection_state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_open_before_listeners_is_not_lost() {
        let (provider, opened) = mock_provider(Some("key"));
        provider.connect(LiveOptions::new(), None).await.unwrap();
        let session = provider.connection().unwrap();

        // Simulate a handshake that finished between session creation and
        // a late subscriber attaching.
        opened.lock().unwrap()[0].driver.emit(LiveTranscriptionEvent::Open);
        let seen = Arc::new(Mutex::new(false));
        let flag = seen.clone();
        session.add_listener(LiveEventKind::Open, move |_| *flag.lock().unwrap() = true);

        assert!(*seen.lock().unwrap());
        assert_eq!(provider.connection_state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_fallback_key_when_credential_missing() {
        let (factory, opened) = mock_factory();
        let provider = TranscriptionProvider::new(
            Arc::new(StaticCredential(None)),
            factory,
            Some("fallback-key".to_string()),
        );
        provider.connect(LiveOptions::new(), None).await.unwrap();
        assert_eq!(opened.lock().unwrap()[0].api_key, "fallback-key");
    }

    #[tokio::test]
    async fn test_connect_fails_without_any_key() {
        let (provider, opened) = mock_provider(None);
        let result = provider.connect(LiveOptions::new(), None).await;
        assert!(matches!(result, Err(AppError::Credential(_))));
        assert!(provider.connection().is_none());
        assert!(opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let (provider, opened) = mock_provider(Some("key"));
        let mut rx = provider.subscribe();
        provider.connect(LiveOptions::new(), None).await.unwrap();

        opened.lock().unwrap()[0].driver.emit(LiveTranscriptionEvent::Open);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_use_transcription_outside_scope_fails() {
        let err = use_transcription().unwrap_err();
        assert!(matches!(err, AppError::OutsideProvider));
        assert_eq!(err.to_string(), OUTSIDE_PROVIDER_MESSAGE);
    }

    #[tokio::test]
    async fn test_use_transcription_inside_scope_shares_state() {
        let (provider, opened) = mock_provider(Some("key"));

        provider
            .scope(async {
                let ctx = use_transcription().unwrap();
                ctx.connect(LiveOptions::new(), None).await.unwrap();
            })
            .await;

        assert!(provider.connection().is_some());
        opened.lock().unwrap()[0].driver.emit(LiveTranscriptionEvent::Open);
        assert_eq!(provider.connection_state(), ConnectionState::Open);
    }

    #[test]
    fn test_deepgram_factory_rejects_bad_url() {
        assert!(deepgram_factory("https://api.deepgram.com").is_err());
        assert!(deepgram_factory("wss://api.deepgram.com").is_ok());
    }
}
