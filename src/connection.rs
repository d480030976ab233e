//! Reconnect-transparent duplex frame channel.
//!
//! A [`Connection`] gives its single consumer a stable pair of queues while
//! the socket underneath may be replaced any number of times.
//!
//! # Architecture
//!
//! ```text
//!   Connection::write ──► outbound queue ──► write pump ──► FrameSink
//!   Connection::read  ◄── inbound queue  ◄── read pump  ◄── FrameSource
//!                                 ▲
//!                                 │ swap_transport(socket)
//!                          Supervisor task
//!                  (detect failure, renegotiate, redial)
//! ```
//!
//! # Reconnection
//!
//! Each socket generation runs two pumps sharing one generation token. The
//! first pump to fail cancels the token; both stop, and the supervisor (the
//! only task that reconnects) waits for them, takes the outbound queue back
//! from the write pump and dials again with capped exponential backoff. A
//! frame whose send failed is kept in the queue's pending slot and goes out
//! first on the next generation, so queued work is never dropped.
//!
//! Only the first connection attempt can fail [`Connection::start`]; later
//! negotiation or socket failures are logged and retried until shutdown.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::constants;
use crate::error::{Error, Result};
use crate::model::Handshake;
use crate::transport::{Connector, FrameSink, FrameSource, Socket};

/// One frame: a UTF-8 JSON document as bytes.
pub type Frame = Vec<u8>;

/// How long a failed generation gets to close its socket.
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Queue sizes and reconnection timing.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Outbound queue capacity; `write` waits when full.
    pub outbound_capacity: usize,
    /// Inbound queue capacity; the read pump waits when full.
    pub inbound_capacity: usize,
    /// First reconnection delay.
    pub reconnect_initial: Duration,
    /// Reconnection delay cap.
    pub reconnect_max: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: constants::OUTBOUND_QUEUE_CAPACITY,
            inbound_capacity: constants::INBOUND_QUEUE_CAPACITY,
            reconnect_initial: constants::RECONNECT_INITIAL_DELAY,
            reconnect_max: constants::RECONNECT_MAX_DELAY,
        }
    }
}

/// Cloneable handle onto the outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
}

impl OutboundSender {
    /// Enqueue a frame, waiting while the queue is full.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }
        self.tx.send(frame).await.map_err(|_| Error::Closed)
    }
}

/// Live connection to the streaming endpoint.
///
/// Owns the supervisor task. Dropping the connection shuts it down.
#[derive(Debug)]
pub struct Connection {
    inbound_rx: mpsc::Receiver<Frame>,
    outbound: OutboundSender,
    handshake_rx: watch::Receiver<Arc<Handshake>>,
    generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl Connection {
    /// Connect for the first time and spawn the supervisor.
    ///
    /// # Errors
    ///
    /// Returns the negotiation or dial failure of this first attempt; there
    /// is no retry before a connection has ever been established.
    pub async fn start<C: Connector>(connector: C, options: ConnectionOptions) -> Result<Self> {
        let (handshake, socket) = connector.connect().await?;
        log::info!(
            "[Connection] Connected as {} ({})",
            handshake.self_user.name,
            handshake.self_user.id
        );
        Ok(Self::with_socket(connector, handshake, socket, options))
    }

    /// Wrap an already-open socket and spawn the supervisor.
    ///
    /// `connector` is only used for reconnection.
    pub fn with_socket<C: Connector>(
        connector: C,
        handshake: Handshake,
        socket: Socket,
        options: ConnectionOptions,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity.max(1));
        let (handshake_tx, handshake_rx) = watch::channel(Arc::new(handshake));
        let generation = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let mut supervisor = Supervisor {
            connector,
            outbound: Some(OutboundQueue {
                rx: outbound_rx,
                pending: None,
            }),
            inbound_tx,
            handshake_tx,
            shutdown: shutdown.clone(),
            backoff: Backoff::new(options.reconnect_initial, options.reconnect_max),
            generation: Arc::clone(&generation),
        };

        let first = supervisor.swap_transport(socket);
        let handle = tokio::spawn(supervisor.run(first));

        Self {
            inbound_rx,
            outbound: OutboundSender {
                tx: outbound_tx,
                shutdown: shutdown.clone(),
            },
            handshake_rx,
            generation,
            shutdown,
            supervisor: Some(handle),
        }
    }

    /// Wait for the next inbound frame.
    ///
    /// Returns `None` once the connection has shut down and every buffered
    /// frame has been read.
    pub async fn read(&mut self) -> Option<Frame> {
        self.inbound_rx.recv().await
    }

    /// Enqueue a frame for transmission, waiting while the queue is full.
    pub async fn write(&self, frame: Frame) -> Result<()> {
        self.outbound.send(frame).await
    }

    /// A cloneable writer onto the same outbound queue.
    pub fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// The handshake of the current socket generation.
    pub fn handshake(&self) -> Arc<Handshake> {
        Arc::clone(&self.handshake_rx.borrow())
    }

    /// Number of socket generations opened so far (1 before any reconnect).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Token cancelled when the connection shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the supervisor and both pumps and close the socket.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the supervisor task to finish after [`Self::shutdown`].
    pub async fn closed(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            if let Err(e) = handle.await {
                log::error!("[Connection] Supervisor task failed: {}", e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The outbound queue plus the frame that was in flight when a socket failed.
struct OutboundQueue {
    rx: mpsc::Receiver<Frame>,
    pending: Option<String>,
}

/// Handles for the two pumps of one socket generation.
struct Generation {
    id: u64,
    token: CancellationToken,
    writer: JoinHandle<OutboundQueue>,
    reader: JoinHandle<()>,
}

impl Generation {
    /// Stop both pumps and take the outbound queue back.
    ///
    /// Returns `None` only if the write pump panicked, in which case the
    /// queue is gone with it.
    async fn stop(self) -> Option<OutboundQueue> {
        self.token.cancel();

        if let Err(e) = self.reader.await {
            log::error!("[Connection] Read pump of generation {} failed: {}", self.id, e);
        }

        match self.writer.await {
            Ok(queue) => Some(queue),
            Err(e) => {
                log::error!("[Connection] Write pump of generation {} failed: {}", self.id, e);
                None
            }
        }
    }
}

/// Owns the reconnect loop; the only task that ever opens a socket after
/// the first.
struct Supervisor<C> {
    connector: C,
    /// `None` while a write pump holds the queue.
    outbound: Option<OutboundQueue>,
    inbound_tx: mpsc::Sender<Frame>,
    handshake_tx: watch::Sender<Arc<Handshake>>,
    shutdown: CancellationToken,
    backoff: Backoff,
    generation: Arc<AtomicU64>,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self, first: Option<Generation>) {
        let mut current = first;

        while let Some(generation) = current.take() {
            // The generation token is a child of `shutdown`, so this also
            // wakes on shutdown.
            generation.token.cancelled().await;

            let id = generation.id;
            let queue = generation.stop().await;

            if self.shutdown.is_cancelled() {
                log::info!("[Connection] Shutdown requested, connection closed");
                return;
            }

            let Some(queue) = queue else {
                return;
            };
            self.outbound = Some(queue);

            log::warn!("[Connection] Socket generation {} lost, reconnecting", id);

            let Some(socket) = self.reconnect().await else {
                log::info!("[Connection] Shutdown requested while reconnecting");
                return;
            };
            current = self.swap_transport(socket);
        }
    }

    /// Replace the live socket: start a new generation's pumps on the same
    /// inbound and outbound queues.
    ///
    /// Must only be called once the previous generation has been stopped and
    /// its outbound queue returned.
    fn swap_transport(&mut self, socket: Socket) -> Option<Generation> {
        let Some(queue) = self.outbound.take() else {
            log::error!("[Connection] Outbound queue unavailable; cannot start pumps");
            return None;
        };

        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = self.shutdown.child_token();
        let Socket { sink, source } = socket;

        let writer = tokio::spawn(write_pump(id, queue, sink, token.clone()));
        let reader = tokio::spawn(read_pump(
            id,
            source,
            self.inbound_tx.clone(),
            token.clone(),
            self.shutdown.clone(),
        ));

        log::debug!("[Connection] Socket generation {} started", id);

        Some(Generation {
            id,
            token,
            writer,
            reader,
        })
    }

    /// Renegotiate and redial until it works or shutdown is requested.
    async fn reconnect(&mut self) -> Option<Socket> {
        loop {
            let delay = self.backoff.next_delay();
            log::info!("[Connection] Reconnecting in {}ms", delay.as_millis());

            tokio::select! {
                () = self.shutdown.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let attempt = tokio::select! {
                () = self.shutdown.cancelled() => return None,
                attempt = self.connector.connect() => attempt,
            };

            match attempt {
                Ok((handshake, socket)) => {
                    log::info!(
                        "[Connection] Reconnected as {} ({})",
                        handshake.self_user.name,
                        handshake.self_user.id
                    );
                    self.backoff.reset();
                    self.handshake_tx.send_replace(Arc::new(handshake));
                    return Some(socket);
                }
                Err(e) => {
                    log::warn!("[Connection] Reconnect attempt failed: {}", e);
                }
            }
        }
    }
}

/// Drain the outbound queue into the socket until the generation ends.
///
/// Returns the queue so the next generation continues where this one left
/// off.
async fn write_pump(
    generation: u64,
    mut queue: OutboundQueue,
    mut sink: Box<dyn FrameSink>,
    token: CancellationToken,
) -> OutboundQueue {
    loop {
        let frame = match queue.pending.take() {
            Some(frame) => {
                log::debug!("[Connection] Resending frame held from a failed socket");
                frame
            }
            None => {
                let next = tokio::select! {
                    () = token.cancelled() => break,
                    next = queue.rx.recv() => next,
                };

                let Some(bytes) = next else {
                    // Every writer is gone; nothing more will be queued.
                    token.cancelled().await;
                    break;
                };

                match String::from_utf8(bytes) {
                    Ok(frame) => frame,
                    Err(_) => {
                        log::warn!("[Connection] Dropping outbound frame that is not UTF-8");
                        continue;
                    }
                }
            }
        };

        // A write under way when the generation ends gets the close grace
        // period to finish. Only a failed or unfinished write is held.
        let sent = {
            let mut send = sink.send(&frame);
            tokio::select! {
                sent = &mut send => Some(sent),
                () = token.cancelled() => {
                    tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, &mut send).await.ok()
                }
            }
        };

        match sent {
            Some(Ok(())) => log::trace!("[Connection] Sent {}", frame),
            Some(Err(e)) => {
                log::warn!("[Connection] Write failed on generation {}: {}", generation, e);
                queue.pending = Some(frame);
                token.cancel();
                break;
            }
            None => {
                // May already be on the wire; resending makes this frame at-least-once.
                log::debug!(
                    "[Connection] Write still pending when generation {} closed, holding frame",
                    generation
                );
                queue.pending = Some(frame);
                break;
            }
        }
    }

    if tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, sink.close()).await.is_err() {
        log::debug!("[Connection] Timed out closing socket generation {}", generation);
    }

    queue
}

/// Move frames from the socket into the inbound queue until the generation ends.
async fn read_pump(
    generation: u64,
    mut source: Box<dyn FrameSource>,
    inbound: mpsc::Sender<Frame>,
    token: CancellationToken,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = token.cancelled() => return,
            next = source.recv() => next,
        };

        match next {
            Some(Ok(frame)) => {
                // A frame already read belongs to the stream; deliver it even
                // if the generation fails meanwhile. Only shutdown discards it.
                let delivered = tokio::select! {
                    () = shutdown.cancelled() => return,
                    delivered = inbound.send(frame.into_bytes()) => delivered,
                };
                if delivered.is_err() {
                    log::debug!("[Connection] Inbound consumer gone, stopping read pump");
                    token.cancel();
                    return;
                }
            }
            Some(Err(e)) => {
                log::warn!("[Connection] Read failed on generation {}: {}", generation, e);
                token.cancel();
                return;
            }
            None => {
                log::info!("[Connection] Socket generation {} ended", generation);
                token.cancel();
                return;
            }
        }
    }
}
