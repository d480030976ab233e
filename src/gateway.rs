//! The handle an embedding application holds.
//!
//! A [`Gateway`] owns a running [`Processor`] (and through it the
//! [`Connection`]) and exposes three things: the stream of forwarded
//! `message` frames, the outbound queue (raw or chunked), and Shared State.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chunk::ChunkLimits;
use crate::config::Config;
use crate::connection::{Connection, ConnectionOptions, Frame, OutboundSender};
use crate::constants::APPLICATION_QUEUE_CAPACITY;
use crate::error::Result;
use crate::handshake::HttpNegotiator;
use crate::processor::{MessageWriter, Processor, ProcessorStats};
use crate::state::StateHandle;
use crate::transport::{Connector, RtmConnector};

/// Everything tunable about a gateway.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Transport queues and reconnection timing.
    pub connection: ConnectionOptions,
    /// Capacity of the processor → application channel.
    pub application_capacity: usize,
    /// Per-message limits for [`Gateway::write`].
    pub limits: ChunkLimits,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            application_capacity: APPLICATION_QUEUE_CAPACITY,
            limits: ChunkLimits::default(),
        }
    }
}

impl GatewayOptions {
    /// Options derived from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            connection: config.connection_options(),
            ..Self::default()
        }
    }
}

/// A running client.
#[derive(Debug)]
pub struct Gateway {
    inbound: mpsc::Receiver<Frame>,
    outbound: OutboundSender,
    writer: MessageWriter,
    state: StateHandle,
    stats: Arc<ProcessorStats>,
    shutdown: CancellationToken,
    processor: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Negotiate with `config.api_url` using `config.token` and start.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built or the first connection
    /// attempt fails. Later failures are retried internally.
    pub async fn connect(config: &Config) -> Result<Self> {
        let negotiator =
            HttpNegotiator::with_timeout(&config.api_url, &config.token, config.http_timeout())?;
        Self::with_connector(RtmConnector::new(negotiator), GatewayOptions::from_config(config)).await
    }

    /// Start over any connector.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first connection attempt.
    pub async fn with_connector<C: Connector>(connector: C, options: GatewayOptions) -> Result<Self> {
        let connection = Connection::start(connector, options.connection).await?;
        let outbound = connection.outbound();

        let (app_tx, app_rx) = mpsc::channel(options.application_capacity.max(1));
        let processor = Processor::new(connection, app_tx, options.limits);

        let writer = processor.writer();
        let state = processor.state();
        let stats = processor.stats();
        let shutdown = processor.shutdown_token();
        let handle = tokio::spawn(processor.run());

        Ok(Self {
            inbound: app_rx,
            outbound,
            writer,
            state,
            stats,
            shutdown,
            processor: Some(handle),
        })
    }

    /// Next forwarded `message` frame, raw. `None` after shutdown.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    /// Send `text` to `channel`, chunked. Returns the event ids used.
    pub async fn write(&self, channel: &str, text: &str) -> Result<Vec<u64>> {
        self.writer.write(channel, text).await
    }

    /// Enqueue an already-encoded frame.
    ///
    /// Raw frames do not take a sequence id; callers that expect
    /// acknowledgments should use [`Self::write`].
    pub async fn send_raw(&self, frame: Frame) -> Result<()> {
        self.outbound.send(frame).await
    }

    /// The chunking writer, for use from other tasks.
    pub fn writer(&self) -> MessageWriter {
        self.writer.clone()
    }

    /// The raw outbound queue, for use from other tasks.
    pub fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Reader onto Shared State.
    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// Processor counters.
    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Token that stops everything when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown without waiting.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Shut down and wait for the processor and the connection to finish.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(handle) = self.processor.take() {
            if let Err(e) = handle.await {
                log::error!("[Gateway] Processor task failed: {}", e);
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
