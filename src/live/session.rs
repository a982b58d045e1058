//! # Live Session Handle
//!
//! A [`LiveSession`] is the opaque handle consumers hold for one streaming
//! connection. It is split from the task that actually owns the transport:
//!
//! - **LiveSession**: cheap to clone, queues outbound audio/control messages and
//!   keeps the listener registry.
//! - **SessionDriver**: owned by the transport task. It drains the outbound
//!   queue and emits events to listeners.
//!
//! ## Lifecycle:
//! `Connecting` → `Open` → `Closed`, or `Connecting` → `Closed` when the
//! handshake fails. `Close` is emitted exactly once; dropping the driver
//! emits it if the transport task did not.
//!
//! ## Late listeners:
//! `Open` and `Close` are lifecycle events. A listener registered after its
//! lifecycle event already fired is invoked immediately, so registration can
//! never lose a race against the handshake.

use crate::error::{AppError, AppResult};
use crate::live::events::{LiveEventKind, LiveTranscriptionEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Callback invoked for every event of the kind it was registered for.
pub type Listener = Arc<dyn Fn(&LiveTranscriptionEvent) + Send + Sync>;

/// Transport state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// JSON control messages understood by the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Keeps an idle connection from timing out.
    KeepAlive,
    /// Flushes buffered audio into a final result without closing.
    Finalize,
    /// Flushes buffered audio and asks the service to close the stream.
    CloseStream,
}

impl ControlMessage {
    pub fn to_json(self) -> String {
        let kind = match self {
            ControlMessage::KeepAlive => "KeepAlive",
            ControlMessage::Finalize => "Finalize",
            ControlMessage::CloseStream => "CloseStream",
        };
        serde_json::json!({ "type": kind }).to_string()
    }
}

/// A message queued by the handle for the transport task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(Vec<u8>),
    Control(ControlMessage),
}

#[derive(Default)]
struct Registry {
    ready_state: Option<ReadyState>,
    listeners: HashMap<LiveEventKind, Vec<Listener>>,
    close_event: Option<LiveTranscriptionEvent>,
}

impl Registry {
    fn ready_state(&self) -> ReadyState {
        self.ready_state.unwrap_or(ReadyState::Connecting)
    }
}

struct Shared {
    registry: Mutex<Registry>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Listeners never run while the lock is held, so a poisoned lock
        // still guards consistent data.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one live streaming connection.
#[derive(Clone)]
pub struct LiveSession {
    id: Uuid,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.id)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl LiveSession {
    /// Create a connected handle/driver pair.
    ///
    /// `SpeechClient` implementations hand the driver to whatever task owns
    /// the transport and return the handle to the caller.
    pub fn channel() -> (LiveSession, SessionDriver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
        });
        let id = Uuid::new_v4();

        let session = LiveSession {
            id,
            shared: shared.clone(),
            outbound: tx,
        };
        let driver = SessionDriver {
            id,
            shared,
            outbound: rx,
        };
        (session, driver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.registry().ready_state()
    }

    /// Subscribe `listener` to events of `kind`.
    pub fn add_listener<F>(&self, kind: LiveEventKind, listener: F)
    where
        F: Fn(&LiveTranscriptionEvent) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);

        let replay = {
            let mut registry = self.shared.registry();
            registry
                .listeners
                .entry(kind)
                .or_default()
                .push(listener.clone());

            match (kind, registry.ready_state()) {
                (LiveEventKind::Open, ReadyState::Open) => Some(LiveTranscriptionEvent::Open),
                (LiveEventKind::Close, ReadyState::Closed) => registry.close_event.clone(),
                _ => None,
            }
        };

        if let Some(event) = replay {
            trace!(session_id = %self.id, ?kind, "replaying lifecycle event to late listener");
            listener(&event);
        }
    }

    /// Queue a chunk of encoded audio.
    pub fn send(&self, audio: impl Into<Vec<u8>>) -> AppResult<()> {
        self.enqueue(Outbound::Audio(audio.into()))
    }

    pub fn keep_alive(&self) -> AppResult<()> {
        self.enqueue(Outbound::Control(ControlMessage::KeepAlive))
    }

    pub fn finalize(&self) -> AppResult<()> {
        self.enqueue(Outbound::Control(ControlMessage::Finalize))
    }

    /// Request graceful termination.
    ///
    /// The service flushes pending results and closes the socket, which in
    /// turn emits `Close`. Finishing an already closed session is a no-op.
    pub fn finish(&self) -> AppResult<()> {
        if self.ready_state() == ReadyState::Closed {
            debug!(session_id = %self.id, "finish on closed session ignored");
            return Ok(());
        }
        self.enqueue(Outbound::Control(ControlMessage::CloseStream))
    }

    fn enqueue(&self, message: Outbound) -> AppResult<()> {
        if self.ready_state() == ReadyState::Closed {
            return Err(AppError::SessionClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| AppError::SessionClosed)
    }
}

/// Transport-side half of a [`LiveSession`].
pub struct SessionDriver {
    id: Uuid,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl SessionDriver {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deliver `event` to its listeners, updating the ready state first.
    ///
    /// `Open` after the session left `Connecting` and any second `Close`
    /// are dropped.
    pub fn emit(&self, event: LiveTranscriptionEvent) {
        let listeners = {
            let mut registry = self.shared.registry();
            match &event {
                LiveTranscriptionEvent::Open => {
                    if registry.ready_state() != ReadyState::Connecting {
                        return;
                    }
                    registry.ready_state = Some(ReadyState::Open);
                }
                LiveTranscriptionEvent::Close { .. } => {
                    if registry.ready_state() == ReadyState::Closed {
                        return;
                    }
                    registry.ready_state = Some(ReadyState::Closed);
                    registry.close_event = Some(event.clone());
                }
                _ => {}
            }
            registry
                .listeners
                .get(&event.kind())
                .cloned()
                .unwrap_or_default()
        };

        for listener in listeners {
            listener(&event);
        }
    }

    /// Wait for the next queued message. `None` once every handle is dropped.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Take a queued message without waiting.
    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry().ready_state() == ReadyState::Closed
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.emit(LiveTranscriptionEvent::Close {
                code: None,
                reason: "session driver stopped".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(session: &LiveSession, kind: LiveEventKind) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        session.add_listener(kind, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (session, driver) = LiveSession::channel();
        assert_eq!(session.ready_state(), ReadyState::Connecting);

        driver.emit(LiveTranscriptionEvent::Open);
        assert_eq!(session.ready_state(), ReadyState::Open);

        driver.emit(LiveTranscriptionEvent::Close {
            code: Some(1000),
            reason: String::new(),
        });
        assert_eq!(session.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_close_emitted_once() {
        let (session, driver) = LiveSession::channel();
        let closes = counter(&session, LiveEventKind::Close);

        driver.emit(LiveTranscriptionEvent::Open);
        driver.emit(LiveTranscriptionEvent::Close {
            code: None,
            reason: "a".into(),
        });
        driver.emit(LiveTranscriptionEvent::Close {
            code: None,
            reason: "b".into(),
        });
        drop(driver);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_listeners_see_lifecycle_events() {
        let (session, driver) = LiveSession::channel();
        driver.emit(LiveTranscriptionEvent::Open);

        let opens = counter(&session, LiveEventKind::Open);
        let closes = counter(&session, LiveEventKind::Close);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        driver.emit(LiveTranscriptionEvent::Close {
            code: Some(1000),
            reason: String::new(),
        });
        let late_close = counter(&session, LiveEventKind::Close);
        let late_open = counter(&session, LiveEventKind::Open);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(late_close.load(Ordering::SeqCst), 1);
        assert_eq!(late_open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_lifecycle_events_are_not_replayed() {
        let (session, driver) = LiveSession::channel();
        driver.emit(LiveTranscriptionEvent::Open);
        driver.emit(LiveTranscriptionEvent::Error("boom".into()));

        let errors = counter(&session, LiveEventKind::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_outbound_queue_and_finish() {
        let (session, mut driver) = LiveSession::channel();
        session.send(vec![1u8, 2, 3]).unwrap();
        session.keep_alive().unwrap();
        session.finish().unwrap();

        assert_eq!(driver.try_next_outbound(), Some(Outbound::Audio(vec![1, 2, 3])));
        assert_eq!(
            driver.try_next_outbound(),
            Some(Outbound::Control(ControlMessage::KeepAlive))
        );
        assert_eq!(
            driver.try_next_outbound(),
            Some(Outbound::Control(ControlMessage::CloseStream))
        );
        assert_eq!(driver.try_next_outbound(), None);
    }

    #[test]
    fn test_send_after_close_fails() {
        let (session, driver) = LiveSession::channel();
        drop(driver);

        assert_eq!(session.ready_state(), ReadyState::Closed);
        assert!(matches!(session.send(vec![0u8]), Err(AppError::SessionClosed)));
        assert!(session.finish().is_ok());
    }

    #[test]
    fn test_control_message_json() {
        assert_eq!(ControlMessage::CloseStream.to_json(), r#"{"type":"CloseStream"}"#);
        assert_eq!(ControlMessage::KeepAlive.to_json(), r#"{"type":"KeepAlive"}"#);
    }
}
