//! Shared fixtures for unit tests.

use crate::credential::StaticCredential;
use crate::error::AppResult;
use crate::live::{LiveOptions, LiveSession, SessionDriver, SpeechClient};
use crate::provider::{ClientFactory, TranscriptionProvider};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve exactly one HTTP response on a random local port.
///
/// Returns the base URL (`http://127.0.0.1:PORT`) and a handle resolving to
/// the raw request text (head and body).
pub async fn serve_once(status: u16, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            raw.extend_from_slice(&buf[..n]);
            if let Some(pos) = find(&raw, b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while raw.len() < header_end + content_length {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();

        String::from_utf8_lossy(&raw).to_string()
    });

    (url, handle)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Sessions opened through [`MockSpeechClient`], with the key each was opened with.
pub type Opened = Arc<Mutex<Vec<OpenedSession>>>;

pub struct OpenedSession {
    pub api_key: String,
    pub endpoint: Option<String>,
    pub options: LiveOptions,
    pub driver: SessionDriver,
}

/// In-memory speech client; tests drive sessions through their drivers.
pub struct MockSpeechClient {
    api_key: String,
    opened: Opened,
}

impl SpeechClient for MockSpeechClient {
    fn listen_live(&self, options: &LiveOptions, endpoint: Option<&str>) -> AppResult<LiveSession> {
        let (session, driver) = LiveSession::channel();
        self.opened.lock().unwrap().push(OpenedSession {
            api_key: self.api_key.clone(),
            endpoint: endpoint.map(str::to_string),
            options: options.clone(),
            driver,
        });
        Ok(session)
    }
}

pub fn mock_factory() -> (ClientFactory, Opened) {
    let opened: Opened = Arc::new(Mutex::new(Vec::new()));
    let shared = opened.clone();
    let factory: ClientFactory = Arc::new(move |api_key: &str| -> AppResult<Arc<dyn SpeechClient>> {
        Ok(Arc::new(MockSpeechClient {
            api_key: api_key.to_string(),
            opened: shared.clone(),
        }) as Arc<dyn SpeechClient>)
    });
    (factory, opened)
}

/// Provider wired to a fixed key and the mock client.
pub fn mock_provider(key: Option<&str>) -> (TranscriptionProvider, Opened) {
    let (factory, opened) = mock_factory();
    let provider = TranscriptionProvider::new(
        Arc::new(StaticCredential(key.map(str::to_string))),
        factory,
        None,
    );
    (provider, opened)
}
