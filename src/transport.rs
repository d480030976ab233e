//! Transport seam between the reconnection supervisor and the network.
//!
//! The supervisor in [`crate::connection`] never touches WebSockets or HTTP
//! directly. It asks a [`Connector`] for a fresh [`Socket`] (one socket
//! generation) and pumps frames through the [`FrameSink`] / [`FrameSource`]
//! halves. Production code uses [`RtmConnector`]; tests plug in in-memory
//! sockets.
//!
//! ```text
//!   Connector::connect()
//!         │  negotiate ──► Handshake { url, self, users, channels }
//!         │  dial url  ──► Socket { sink, source }
//!         ▼
//!   supervisor ── swap_transport(socket) ──► write pump / read pump
//! ```

use async_trait::async_trait;

use crate::error::{Error, TransportError};
use crate::handshake::Negotiator;
use crate::model::Handshake;

/// Write half of one socket generation.
#[async_trait]
pub trait FrameSink: Send {
    /// Transmit one text frame.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Close the socket. Errors are not interesting at this point.
    async fn close(&mut self);
}

/// Read half of one socket generation.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, an error, or `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

/// Both halves of one live socket.
pub struct Socket {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub source: Box<dyn FrameSource>,
}

impl Socket {
    /// Bundle two halves.
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Produces connected sockets: negotiation followed by the streaming upgrade.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Negotiate and open a new socket generation.
    async fn connect(&self) -> Result<(Handshake, Socket), Error>;
}

/// Negotiates over HTTP, then dials the returned URL over WebSocket.
#[derive(Debug)]
pub struct RtmConnector<N> {
    negotiator: N,
}

impl<N: Negotiator> RtmConnector<N> {
    /// Wrap a negotiator.
    pub fn new(negotiator: N) -> Self {
        Self { negotiator }
    }
}

#[async_trait]
impl<N: Negotiator + 'static> Connector for RtmConnector<N> {
    async fn connect(&self) -> Result<(Handshake, Socket), Error> {
        let handshake = self.negotiator.negotiate().await?;

        log::info!("[Connection] Dialing {}", redact_url(&handshake.url));
        let (writer, reader) = crate::ws::connect(&handshake.url).await?;

        Ok((handshake, Socket::new(writer, reader)))
    }
}

/// Strip the query and path from a streaming URL for logging.
///
/// The path of an RTM URL is a session ticket and should not end up in logs.
fn redact_url(url: &str) -> String {
    let after_scheme = url.find("://").map_or(0, |i| i + 3);
    match url[after_scheme..].find('/') {
        Some(slash) => format!("{}/…", &url[..after_scheme + slash]),
        None => url.to_string(),
    }
}
