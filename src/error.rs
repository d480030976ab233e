//! Error types for negotiation, transport and frame decoding.
//!
//! Transport failures are recovered by reconnection inside
//! [`crate::connection`] and only reach callers on the very first connect.
//! Decode failures are per-frame: the frame is dropped, the loop continues.

use std::fmt;

use tokio_tungstenite::tungstenite;

use crate::constants::DECODE_EXCERPT_RADIUS;

/// Socket or HTTP level failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The negotiation request could not be sent or its body not read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// WebSocket handshake, read or write failure.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    /// The peer sent a close frame.
    #[error("connection closed by peer (code {code}): {reason}")]
    Closed {
        /// WebSocket close code (1005 when none was given).
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// The stream ended without a close frame.
    #[error("connection stream ended")]
    Ended,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// A JSON document that failed to decode.
///
/// Keeps a bounded excerpt of the raw payload around the failure offset so
/// logs show where a malformed frame went wrong without dumping it whole.
#[derive(Debug)]
pub struct ProtocolDecodeError {
    source: serde_json::Error,
    offset: usize,
    excerpt: String,
}

impl ProtocolDecodeError {
    /// Build from a `serde_json` failure on `raw`.
    pub fn new(source: serde_json::Error, raw: &[u8]) -> Self {
        let offset = byte_offset(raw, source.line(), source.column());
        let start = offset.saturating_sub(DECODE_EXCERPT_RADIUS);
        let end = offset.saturating_add(DECODE_EXCERPT_RADIUS).min(raw.len());
        let excerpt = String::from_utf8_lossy(&raw[start..end]).into_owned();

        Self {
            source,
            offset,
            excerpt,
        }
    }

    /// Byte offset of the failure within the payload.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Up to [`DECODE_EXCERPT_RADIUS`] bytes either side of [`Self::offset`].
    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }

    /// The underlying parser error.
    pub fn json_error(&self) -> &serde_json::Error {
        &self.source
    }
}

impl fmt::Display for ProtocolDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed JSON at byte {}: {} (near {:?})",
            self.offset, self.source, self.excerpt
        )
    }
}

impl std::error::Error for ProtocolDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Convert serde_json's 1-based line/column into a byte offset into `raw`.
fn byte_offset(raw: &[u8], line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }

    let line_start = raw
        .split_inclusive(|&b| b == b'\n')
        .take(line - 1)
        .map(<[u8]>::len)
        .sum::<usize>();

    line_start.saturating_add(column.saturating_sub(1)).min(raw.len())
}

/// Decode a JSON payload, attaching an excerpt on failure.
pub fn decode<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, ProtocolDecodeError> {
    serde_json::from_slice(raw).map_err(|e| ProtocolDecodeError::new(e, raw))
}

/// The negotiation request failed.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// Network-level failure reaching the endpoint.
    #[error("negotiation request failed: {0}")]
    Transport(#[from] TransportError),
    /// The endpoint answered with a non-success HTTP status.
    #[error("negotiation returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// The response body was not a valid negotiation document.
    #[error("negotiation response could not be decoded: {source}")]
    Decode {
        /// Decode failure with excerpt.
        #[source]
        source: ProtocolDecodeError,
        /// Raw response body.
        body: String,
    },
    /// The service answered `ok: false`.
    #[error("negotiation rejected: {reason}")]
    Rejected {
        /// The service's `error` field, or `"unknown"`.
        reason: String,
        /// Raw response body.
        body: String,
    },
}

impl NegotiationError {
    /// Raw response body, when the endpoint produced one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Transport(_) => None,
            Self::Status { body, .. } | Self::Decode { body, .. } | Self::Rejected { body, .. } => {
                Some(body)
            }
        }
    }
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connecting (or the first connect) failed at negotiation.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// Connecting failed at the socket.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] ProtocolDecodeError),
    /// An outbound event could not be serialized.
    #[error("failed to encode outbound event: {0}")]
    Encode(#[source] serde_json::Error),
    /// The connection has been shut down.
    #[error("connection is closed")]
    Closed,
}

/// Crate-level result.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_reports_offset_and_excerpt() {
        let raw = br#"{"type": "message", "text": oops}"#;
        let err = decode::<serde_json::Value>(raw).unwrap_err();

        assert_eq!(&raw[err.offset()..err.offset() + 1], b"o");
        assert!(err.excerpt().contains("oops"));
        assert!(err.to_string().contains("malformed JSON"));
    }

    #[test]
    fn test_decode_error_excerpt_is_bounded() {
        let mut raw = vec![b'['; 1];
        raw.extend(std::iter::repeat(b'1').take(200));
        raw.extend_from_slice(b",x");
        raw.extend(std::iter::repeat(b' ').take(200));

        let err = decode::<serde_json::Value>(&raw).unwrap_err();
        assert!(err.excerpt().len() <= DECODE_EXCERPT_RADIUS * 2);
        assert!(err.excerpt().contains('x'));
    }

    #[test]
    fn test_decode_error_offset_on_later_line() {
        let raw = b"{\n  \"a\": 1,\n  \"b\": ?\n}";
        let err = decode::<serde_json::Value>(raw).unwrap_err();
        assert_eq!(raw[err.offset()], b'?');
    }

    #[test]
    fn test_decode_error_handles_multibyte_excerpt() {
        let raw = "{\"text\": \"héllo wörld ünïcödé\" oops}".as_bytes();
        let err = decode::<serde_json::Value>(raw).unwrap_err();
        assert!(!err.excerpt().is_empty());
    }

    #[test]
    fn test_negotiation_error_body() {
        let err = NegotiationError::Rejected {
            reason: "invalid_auth".to_string(),
            body: r#"{"ok":false}"#.to_string(),
        };
        assert_eq!(err.body(), Some(r#"{"ok":false}"#));
        assert!(err.to_string().contains("invalid_auth"));

        let err = NegotiationError::Transport(TransportError::Ended);
        assert_eq!(err.body(), None);
    }
}
