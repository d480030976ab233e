//! Event Processor: the dispatch loop over inbound frames, and the chunking
//! writer for outbound messages.
//!
//! The loop is the single writer of Shared State. Each frame is classified
//! by [`Envelope::dispatch`] and handled synchronously before the next one is
//! read; a failure in one frame is logged and never ends the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::chunk::{chunks, ChunkLimits};
use crate::connection::{Connection, Frame, OutboundSender};
use crate::error::{decode, Error, Result};
use crate::event::{Dispatch, Envelope, ErrorEvent, EventKind, OutboundEvent, UserChangeEvent};
use crate::state::{StateHandle, StateWriter};

/// Sends chat messages, split to fit the service's limits.
///
/// Clones share one sequence counter, so ids are unique and strictly
/// increasing for the life of the processor, across reconnections.
#[derive(Debug, Clone)]
pub struct MessageWriter {
    outbound: OutboundSender,
    sequence: Arc<Mutex<u64>>,
    limits: ChunkLimits,
}

impl MessageWriter {
    /// Writer onto `outbound`, starting at id 1.
    pub fn new(outbound: OutboundSender, limits: ChunkLimits) -> Self {
        Self {
            outbound,
            sequence: Arc::new(Mutex::new(0)),
            limits,
        }
    }

    /// Send `text` to `channel` as one event per chunk, in order.
    ///
    /// Returns the ids assigned, one per chunk. Empty text sends nothing.
    /// Concurrent calls do not interleave their chunks.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] once the connection has shut down; chunks sent
    /// before that point stay sent.
    pub async fn write(&self, channel: &str, text: &str) -> Result<Vec<u64>> {
        let mut sequence = self.sequence.lock().await;
        let mut ids = Vec::new();

        for chunk in chunks(text, self.limits) {
            let id = *sequence + 1;
            let frame = serde_json::to_vec(&OutboundEvent::message(id, channel, chunk))
                .map_err(Error::Encode)?;
            *sequence = id;
            self.outbound.send(frame).await?;
            ids.push(id);
        }

        if ids.len() > 1 {
            log::debug!("[Processor] Split message to {} into {} chunks", channel, ids.len());
        }
        Ok(ids)
    }

    /// Last id handed out, 0 before the first write.
    pub async fn last_id(&self) -> u64 {
        *self.sequence.lock().await
    }

    /// Limits applied to each chunk.
    pub fn limits(&self) -> ChunkLimits {
        self.limits
    }
}

/// Counters kept by the dispatch loop.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    frames: AtomicU64,
    decode_failures: AtomicU64,
    acks: AtomicU64,
    rejected_acks: AtomicU64,
    highest_ack: AtomicU64,
    forwarded: AtomicU64,
    suppressed: AtomicU64,
    user_changes: AtomicU64,
    remote_errors: AtomicU64,
}

/// Point-in-time copy of [`ProcessorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames read from the connection.
    pub frames: u64,
    /// Frames dropped as malformed.
    pub decode_failures: u64,
    /// Acknowledgments consumed.
    pub acks: u64,
    /// Acknowledgments with `ok: false`.
    pub rejected_acks: u64,
    /// Highest acknowledged event id.
    pub highest_ack: u64,
    /// `message` frames handed to the application.
    pub forwarded: u64,
    /// Edits and deletes dropped.
    pub suppressed: u64,
    /// Directory entries updated by `user_change`.
    pub user_changes: u64,
    /// `error` events received.
    pub remote_errors: u64,
}

impl ProcessorStats {
    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            rejected_acks: self.rejected_acks.load(Ordering::Relaxed),
            highest_ack: self.highest_ack.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            user_changes: self.user_changes.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// The dispatch loop. Build with [`Processor::new`], then [`Processor::run`]
/// it on its own task.
#[derive(Debug)]
pub struct Processor {
    connection: Connection,
    state: StateWriter,
    app_tx: mpsc::Sender<Frame>,
    writer: MessageWriter,
    stats: Arc<ProcessorStats>,
    shutdown: CancellationToken,
}

impl Processor {
    /// Take ownership of `connection`; forwarded messages go to `app_tx`.
    ///
    /// Shared State is seeded from the connection's current handshake.
    pub fn new(connection: Connection, app_tx: mpsc::Sender<Frame>, limits: ChunkLimits) -> Self {
        let state = StateWriter::new();
        state.apply_handshake(&connection.handshake());

        Self {
            writer: MessageWriter::new(connection.outbound(), limits),
            shutdown: connection.shutdown_token(),
            connection,
            state,
            app_tx,
            stats: Arc::new(ProcessorStats::default()),
        }
    }

    /// Reader onto Shared State.
    pub fn state(&self) -> StateHandle {
        self.state.handle()
    }

    /// The chunking writer bound to this connection.
    pub fn writer(&self) -> MessageWriter {
        self.writer.clone()
    }

    /// Live counters.
    pub fn stats(&self) -> Arc<ProcessorStats> {
        Arc::clone(&self.stats)
    }

    /// Token that stops the loop and the connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatch frames until shutdown, then close the connection.
    pub async fn run(mut self) {
        log::info!("[Processor] Dispatch loop started");

        loop {
            let frame = tokio::select! {
                () = self.shutdown.cancelled() => break,
                frame = self.connection.read() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            self.handle_frame(frame).await;
        }

        self.connection.shutdown();
        self.connection.closed().await;
        log::info!("[Processor] Dispatch loop stopped");
    }

    async fn handle_frame(&self, frame: Frame) {
        bump(&self.stats.frames);
        log::trace!("[Processor] Received {}", String::from_utf8_lossy(&frame));

        let envelope: Envelope = match decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                bump(&self.stats.decode_failures);
                log::warn!("[Processor] Dropping frame: {}", e);
                return;
            }
        };

        match envelope.dispatch() {
            Dispatch::Ack { reply_to, ok } => self.on_ack(reply_to, ok),
            Dispatch::Suppressed => {
                bump(&self.stats.suppressed);
                log::debug!("[Processor] Suppressed message edit/delete");
            }
            Dispatch::Untyped => log::trace!("[Processor] Ignoring frame without type"),
            Dispatch::Event(EventKind::Hello) => self.on_hello(),
            Dispatch::Event(EventKind::Message) => self.on_message(frame).await,
            Dispatch::Event(EventKind::UserChange) => self.on_user_change(&frame),
            Dispatch::Event(EventKind::Error) => self.on_error(&frame),
            Dispatch::Event(EventKind::Unknown) => {}
        }
    }

    fn on_ack(&self, reply_to: Option<u64>, ok: bool) {
        bump(&self.stats.acks);
        if let Some(id) = reply_to {
            self.stats.highest_ack.fetch_max(id, Ordering::Relaxed);
        }

        if ok {
            log::debug!("[Processor] Ack for event {:?}", reply_to);
        } else {
            bump(&self.stats.rejected_acks);
            log::warn!("[Processor] Event {:?} rejected by service", reply_to);
        }
    }

    fn on_hello(&self) {
        let handshake = self.connection.handshake();
        self.state.apply_handshake(&handshake);
        log::info!(
            "[Processor] Hello: {} users, {} channels (generation {})",
            handshake.users.len(),
            handshake.channels.len(),
            self.connection.generation()
        );
    }

    async fn on_message(&self, frame: Frame) {
        let permit = tokio::select! {
            () = self.shutdown.cancelled() => return,
            permit = self.app_tx.reserve() => permit,
        };
        match permit {
            Ok(permit) => {
                // Counted before the application can observe the frame.
                bump(&self.stats.forwarded);
                permit.send(frame);
            }
            Err(_) => log::debug!("[Processor] Application receiver gone, message discarded"),
        }
    }

    fn on_user_change(&self, frame: &[u8]) {
        match decode::<UserChangeEvent>(frame) {
            Ok(event) => {
                log::debug!("[Processor] User {} changed", event.user.id);
                self.state.upsert_user(event.user);
                bump(&self.stats.user_changes);
            }
            Err(e) => {
                bump(&self.stats.decode_failures);
                log::warn!("[Processor] Bad user_change: {}", e);
            }
        }
    }

    fn on_error(&self, frame: &[u8]) {
        bump(&self.stats.remote_errors);
        match decode::<ErrorEvent>(frame) {
            Ok(event) => log::warn!(
                "[Processor] Service error {}: {}",
                event.error.code,
                event.error.msg
            ),
            Err(e) => log::warn!("[Processor] Service error (undecodable): {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{fast_options, ConnectorControl, MemoryConnector, Remote, TEST_TIMEOUT};

    struct Harness {
        control: ConnectorControl,
        remote: Remote,
        app_rx: mpsc::Receiver<Frame>,
        state: StateHandle,
        stats: Arc<ProcessorStats>,
        writer: MessageWriter,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    async fn harness(limits: ChunkLimits) -> Harness {
        let (connector, mut control) = MemoryConnector::new();
        let connection = Connection::start(connector, fast_options()).await.unwrap();
        let remote = control.next_remote().await;
        let (app_tx, app_rx) = mpsc::channel(16);

        let processor = Processor::new(connection, app_tx, limits);
        let state = processor.state();
        let stats = processor.stats();
        let writer = processor.writer();
        let shutdown = processor.shutdown_token();
        let task = tokio::spawn(processor.run());

        Harness {
            control,
            remote,
            app_rx,
            state,
            stats,
            writer,
            shutdown,
            task,
        }
    }

    async fn next_app(app_rx: &mut mpsc::Receiver<Frame>) -> String {
        let frame = tokio::time::timeout(TEST_TIMEOUT, app_rx.recv())
            .await
            .expect("timed out waiting for forwarded frame")
            .expect("processor stopped");
        String::from_utf8(frame).unwrap()
    }

    #[tokio::test]
    async fn test_state_seeded_from_handshake() {
        let h = harness(ChunkLimits::default()).await;
        assert_eq!(h.state.self_user().id, "UBOT");
        assert_eq!(h.state.user_count(), 2);
        assert_eq!(h.state.channel("C1").unwrap().name, "general");
    }

    #[tokio::test]
    async fn test_message_forwarded_unchanged() {
        let mut h = harness(ChunkLimits::default()).await;
        let raw = r#"{"type":"message","channel":"C1","user":"U1","text":"hi <@UBOT>"}"#;
        h.remote.push(raw);
        assert_eq!(next_app(&mut h.app_rx).await, raw);
        assert_eq!(h.stats.snapshot().forwarded, 1);
    }

    #[tokio::test]
    async fn test_edits_acks_and_noise_never_reach_application() {
        let mut h = harness(ChunkLimits::default()).await;
        h.remote.push(r#"{"type":"message","subtype":"message_changed","message":{}}"#);
        h.remote.push(r#"{"type":"message","subtype":"message_deleted"}"#);
        h.remote.push(r#"{"ok":true,"reply_to":4,"ts":"1.0","text":"echo"}"#);
        h.remote.push(r#"{"type":"message","reply_to":2}"#);
        h.remote.push(r#"{"type":"presence_change","user":"U1"}"#);
        h.remote.push(r#"{"no_type":true}"#);
        h.remote.push("not json at all");
        h.remote.push(r#"{"type":"error","error":{"code":2,"msg":"message text is missing"}}"#);
        h.remote.push(r#"{"type":"message","text":"real"}"#);

        assert_eq!(next_app(&mut h.app_rx).await, r#"{"type":"message","text":"real"}"#);

        let stats = h.stats.snapshot();
        assert_eq!(stats.frames, 9);
        assert_eq!(stats.suppressed, 2);
        assert_eq!(stats.acks, 2);
        assert_eq!(stats.highest_ack, 4);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.remote_errors, 1);
        assert_eq!(stats.forwarded, 1);
        assert!(h.app_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_user_change_upserts_and_bad_payload_is_isolated() {
        let mut h = harness(ChunkLimits::default()).await;
        h.remote.push(r#"{"type":"user_change"}"#);
        h.remote.push(r#"{"type":"user_change","user":{"id":"U1","name":"alice"}}"#);
        h.remote.push(r#"{"type":"user_change","user":{"id":"U7","name":"gus"}}"#);
        h.remote.push(r#"{"type":"message","text":"sync"}"#);
        next_app(&mut h.app_rx).await;

        let alice = h.state.user("U1").unwrap();
        assert_eq!(alice.name, "alice");
        assert_eq!(alice.real_name, "");
        assert_eq!(h.state.user("U7").unwrap().name, "gus");
        assert_eq!(h.stats.snapshot().user_changes, 2);
        assert_eq!(h.stats.snapshot().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_user_change_with_null_fields_upserts() {
        let mut h = harness(ChunkLimits::default()).await;
        h.remote.push(
            r#"{"type":"user_change","user":{"id":"U9","name":"ivy","real_name":null,"is_bot":null,"profile":{"email":null}}}"#,
        );
        h.remote.push(r#"{"type":"message","text":"sync"}"#);
        next_app(&mut h.app_rx).await;

        let ivy = h.state.user("U9").unwrap();
        assert_eq!(ivy.name, "ivy");
        assert_eq!(ivy.real_name, "");
        assert!(!ivy.is_bot);
        assert_eq!(ivy.profile.email, "");
        assert_eq!(h.stats.snapshot().user_changes, 1);
        assert_eq!(h.stats.snapshot().decode_failures, 0);
    }

    #[tokio::test]
    async fn test_hello_reapplies_handshake() {
        let mut h = harness(ChunkLimits::default()).await;
        h.remote.push(r#"{"type":"user_change","user":{"id":"U1","name":"renamed"}}"#);
        h.remote.push(r#"{"type":"hello"}"#);
        h.remote.push(r#"{"type":"message","text":"sync"}"#);
        next_app(&mut h.app_rx).await;

        assert_eq!(h.state.user("U1").unwrap().real_name, "Alice Liddell");
    }

    #[tokio::test]
    async fn test_write_chunks_with_increasing_ids() {
        let limits = ChunkLimits {
            max_chars: 10,
            max_lines: 25,
        };
        let mut h = harness(limits).await;

        let ids = h.writer.write("C1", "alpha beta gamma").await.unwrap();
        assert_eq!(ids, vec![1, 2]);

        let first: serde_json::Value = serde_json::from_str(&h.remote.next_sent().await).unwrap();
        let second: serde_json::Value = serde_json::from_str(&h.remote.next_sent().await).unwrap();
        assert_eq!(
            first,
            serde_json::json!({"id": 1, "type": "message", "channel": "C1", "text": "alpha"})
        );
        assert_eq!(second["id"], 2);
        assert_eq!(second["text"], "beta gamma");

        assert!(h.writer.write("C1", "").await.unwrap().is_empty());
        assert_eq!(h.writer.last_id().await, 2);
    }

    #[tokio::test]
    async fn test_sequence_ids_continue_across_reconnection() {
        let mut h = harness(ChunkLimits::default()).await;
        assert_eq!(h.writer.write("C1", "one").await.unwrap(), vec![1]);
        assert!(h.remote.next_sent().await.contains(r#""id":1"#));

        drop(h.remote);
        let ids = h.writer.write("C1", "two").await.unwrap();
        let mut remote2 = h.control.next_remote().await;
        let sent: serde_json::Value = serde_json::from_str(&remote2.next_sent().await).unwrap();

        assert_eq!(ids, vec![2]);
        assert_eq!(sent["id"], 2);
        assert_eq!(sent["text"], "two");
    }

    #[tokio::test]
    async fn test_dropped_application_receiver_does_not_stop_loop() {
        let h = harness(ChunkLimits::default()).await;
        drop(h.app_rx);
        h.remote.push(r#"{"type":"message","text":"lost"}"#);
        h.remote.push(r#"{"type":"user_change","user":{"id":"U8","name":"hal"}}"#);

        tokio::time::timeout(TEST_TIMEOUT, async {
            while h.state.user("U8").is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.stats.snapshot().forwarded, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_writes() {
        let h = harness(ChunkLimits::default()).await;
        h.shutdown.cancel();
        tokio::time::timeout(TEST_TIMEOUT, h.task).await.unwrap().unwrap();
        assert!(matches!(
            h.writer.write("C1", "late").await,
            Err(Error::Closed)
        ));
    }
}
