//! Protocol limits and tuning constants for slack-rtm.
//!
//! This module centralizes the magic numbers used by the transport and the
//! event processor. Constants are grouped by domain.
//!
//! # Categories
//!
//! - **Endpoints**: Default service URLs
//! - **Timeouts**: Network and reconnection timing
//! - **Queues**: Channel capacities between layers
//! - **Messages**: Outbound message size limits

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Default negotiation endpoint (`rtm.start`).
pub const DEFAULT_API_URL: &str = "https://slack.com/api/rtm.start";

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for the negotiation request.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// First delay before retrying a failed reconnection.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the reconnection delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Lower bound of the jitter factor applied to each reconnection delay.
///
/// Delays are scaled by a uniform factor in `[RECONNECT_JITTER_MIN, 1.0]` so
/// that many clients dropped at once do not retry in lockstep.
pub const RECONNECT_JITTER_MIN: f64 = 0.5;

// ============================================================================
// Queues
// ============================================================================

/// Capacity of the outbound frame queue.
///
/// `Connection::write` waits for space once this many frames are queued,
/// so a stalled socket applies backpressure instead of growing memory.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the inbound frame queue between the read pump and the processor.
pub const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the application-facing channel of forwarded `message` frames.
pub const APPLICATION_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Messages
// ============================================================================

/// Maximum number of characters in one outbound message.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Maximum number of newlines in one outbound message.
pub const MAX_MESSAGE_LINES: usize = 25;

/// Maximum number of bytes shown on each side of a decode failure offset.
pub const DECODE_EXCERPT_RADIUS: usize = 40;
