//! WebSocket transport for the streaming endpoint.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. Everything else in the crate goes through the
//! [`FrameSink`] / [`FrameSource`] traits these halves implement, so
//! `tokio-tungstenite` types never leak past this module.

// Rust guideline compliant 2026-02

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::error::TransportError;
use crate::transport::{FrameSink, FrameSource};

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .map_err(TransportError::from)
    }

    /// Send a close frame, then flush and close the sink.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone; closing the sink is what matters.
        let _ = self.sink.send(tungstenite::Message::Close(None)).await;
        self.sink.close().await.map_err(TransportError::from)
    }
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.send_text(frame).await
    }

    async fn close(&mut self) {
        if let Err(e) = WsWriter::close(self).await {
            log::debug!("[Connection] Error closing socket: {}", e);
        }
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv_message(&mut self) -> Option<Result<WsMessage, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            return Some(Ok(match message {
                tungstenite::Message::Text(text) => WsMessage::Text(text),
                tungstenite::Message::Binary(data) => WsMessage::Binary(data),
                tungstenite::Message::Ping(data) => WsMessage::Ping(data),
                tungstenite::Message::Pong(data) => WsMessage::Pong(data),
                tungstenite::Message::Close(close_frame) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    WsMessage::Close { code, reason }
                }
                // Raw frames are never surfaced
                tungstenite::Message::Frame(_) => continue,
            }));
        }
    }
}

#[async_trait]
impl FrameSource for WsReader {
    /// Yields text frames only.
    ///
    /// Pings are answered by tungstenite itself on the next read/write, so
    /// control frames are dropped here. A close frame ends the generation.
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.recv_message().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => log::warn!("[Connection] Dropping non-UTF-8 binary frame"),
                },
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close { code, reason }) => {
                    return Some(Err(TransportError::Closed { code, reason }));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Connect to a WebSocket URL.
///
/// Performs the WebSocket handshake and returns split (writer, reader)
/// halves for independent use by the write and read pumps.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the WebSocket handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader), TransportError> {
    use tungstenite::client::IntoClientRequest;

    let request = url.into_client_request()?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}
