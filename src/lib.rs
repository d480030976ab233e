//! slack-rtm - resilient client for Slack's real-time messaging stream.
//!
//! # Architecture
//!
//! ```text
//!   application ◄── Gateway ◄── Processor ◄── Connection ◄── socket generation N
//!                      │            │              ▲
//!                      │            └─ StateWriter │ swap_transport on failure
//!                      └── MessageWriter ──────────┘
//! ```
//!
//! - **Connection** - stable read/write queues over a socket that may be
//!   replaced; renegotiates and redials with backoff, losing no queued writes
//! - **Processor** - single dispatch loop: forwards messages, suppresses
//!   edits and deletes, consumes acknowledgments, keeps Shared State current
//! - **Gateway** - what the embedding application holds
//!
//! # Modules
//!
//! - [`handshake`] - `rtm.start` negotiation
//! - [`connection`] - reconnecting transport
//! - [`processor`] - dispatch loop and chunking writer
//! - [`state`] - identity, directory and channels
//! - [`config`] - configuration loading/saving

// Rust guideline compliant 2026-02

pub mod backoff;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handshake;
pub mod model;
pub mod processor;
pub mod state;
pub mod transport;
pub mod ws;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use chunk::ChunkLimits;
pub use config::Config;
pub use connection::{Connection, ConnectionOptions, Frame, OutboundSender};
pub use error::{Error, NegotiationError, ProtocolDecodeError, Result, TransportError};
pub use gateway::{Gateway, GatewayOptions};
pub use handshake::{HttpNegotiator, Negotiator};
pub use model::{Channel, Handshake, User, UserProfile};
pub use processor::{MessageWriter, Processor, StatsSnapshot};
pub use state::{State, StateHandle};
pub use transport::{Connector, RtmConnector, Socket};
