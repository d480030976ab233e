//! In-memory sockets and a scripted connector for unit tests.
//!
//! Each successful [`MemoryConnector::connect`] hands the test a [`Remote`]:
//! the far end of the new socket generation. Dropping `Remote::sent` makes
//! the next write fail; dropping `Remote::inbound` ends the read side.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::ConnectionOptions;
use crate::error::{Error, NegotiationError, TransportError};
use crate::model::{Handshake, User};
use crate::transport::{Connector, FrameSink, FrameSource, Socket};

/// Generous bound for anything a test waits on.
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The service side of one in-memory socket generation.
pub(crate) struct Remote {
    /// Frames the client wrote.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Push frames (or failures) to the client.
    pub inbound: mpsc::UnboundedSender<Result<String, TransportError>>,
    /// Url from the handshake that produced this socket.
    pub url: String,
}

impl Remote {
    /// Next frame the client wrote, failing the test after [`TEST_TIMEOUT`].
    pub async fn next_sent(&mut self) -> String {
        tokio::time::timeout(TEST_TIMEOUT, self.sent.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client socket closed")
    }

    /// Push a text frame to the client.
    pub fn push(&self, frame: &str) {
        self.inbound
            .send(Ok(frame.to_string()))
            .expect("client read side gone");
    }
}

struct MemorySink {
    sent: mpsc::UnboundedSender<String>,
    write_delay_ms: Arc<AtomicU64>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.sent
            .send(frame.to_string())
            .map_err(|_| TransportError::Ended)
    }

    async fn close(&mut self) {}
}

struct MemorySource(mpsc::UnboundedReceiver<Result<String, TransportError>>);

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.0.recv().await
    }
}

/// Connector producing in-memory sockets, with scriptable failures.
pub(crate) struct MemoryConnector {
    remotes: mpsc::UnboundedSender<Remote>,
    attempts: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    write_delay_ms: Arc<AtomicU64>,
}

/// Test-side controls for a [`MemoryConnector`].
pub(crate) struct ConnectorControl {
    remotes: mpsc::UnboundedReceiver<Remote>,
    attempts: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    write_delay_ms: Arc<AtomicU64>,
}

impl ConnectorControl {
    /// Wait for the next socket generation to be opened.
    pub async fn next_remote(&mut self) -> Remote {
        tokio::time::timeout(TEST_TIMEOUT, self.remotes.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Make the next `n` connect attempts fail at negotiation.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make every socket write take `delay` before it lands.
    pub fn delay_writes(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Total connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl MemoryConnector {
    pub fn new() -> (Self, ConnectorControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let failures_left = Arc::new(AtomicUsize::new(0));
        let write_delay_ms = Arc::new(AtomicU64::new(0));
        (
            Self {
                remotes: tx,
                attempts: Arc::clone(&attempts),
                failures_left: Arc::clone(&failures_left),
                write_delay_ms: Arc::clone(&write_delay_ms),
            },
            ConnectorControl {
                remotes: rx,
                attempts,
                failures_left,
                write_delay_ms,
            },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<(Handshake, Socket), Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Negotiation(NegotiationError::Rejected {
                reason: "scripted_failure".to_string(),
                body: String::new(),
            }));
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let url = format!("mem://socket/{}", attempt);

        let _ = self.remotes.send(Remote {
            sent: sent_rx,
            inbound: inbound_tx,
            url: url.clone(),
        });

        Ok((
            handshake_fixture(&url),
            Socket::new(
                MemorySink {
                    sent: sent_tx,
                    write_delay_ms: Arc::clone(&self.write_delay_ms),
                },
                MemorySource(inbound_rx),
            ),
        ))
    }
}

/// A handshake with one identity, two users and one channel.
pub(crate) fn handshake_fixture(url: &str) -> Handshake {
    serde_json::from_value(serde_json::json!({
        "ok": true,
        "url": url,
        "self": {"id": "UBOT", "name": "bot", "is_bot": true},
        "users": [
            {"id": "UBOT", "name": "bot", "is_bot": true},
            {"id": "U1", "name": "alice", "real_name": "Alice Liddell"}
        ],
        "channels": [
            {"id": "C1", "name": "general", "is_channel": true, "is_general": true, "members": ["UBOT", "U1"]}
        ]
    }))
    .expect("fixture decodes")
}

/// Options with millisecond reconnect delays.
pub(crate) fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        reconnect_initial: Duration::from_millis(1),
        reconnect_max: Duration::from_millis(10),
        ..ConnectionOptions::default()
    }
}

/// A user record for directory tests.
pub(crate) fn user(id: &str, name: &str) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        ..User::default()
    }
}
