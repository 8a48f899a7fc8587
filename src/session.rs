//! Session controller: owns the document state and the relay
//! connection.
//!
//! ```text
//! rendering surface                     relay (websocket)
//!   │ local edit / caret move                  ▲ │
//!   ▼                                          │ ▼
//! SessionController ── diff ──► Operation ── send
//!   │        ▲                                  │
//!   │        └── apply / merge ◄── Operation ◄──┘
//!   ▼
//! SessionEvent (Joined / TextChanged / PresenceChanged / Disconnected)
//! ```
//!
//! Lifecycle: `Disconnected → Connecting → Joined`. The connection is
//! an owned resource: [`SessionController::connect`] acquires the
//! socket and spawns one reader and one writer task, [`close`] (or
//! drop) releases them. All document and presence state is mutated
//! only from the controller's own methods, so the core needs no locks;
//! message arrival is the sole suspension point.
//!
//! Edits made while the transport is down are applied locally (typing
//! is never blocked), queued, and flushed in order on the next
//! `connect`. Cursor reports are never queued: stale caret positions
//! are worthless, so they are dropped silently while offline.
//!
//! [`close`]: SessionController::close

use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::diff::diff;
use crate::document::{apply_operation, TextSnapshot};
use crate::presence::{color_for_user, PresenceEntry, PresenceTable};
use crate::protocol::{Operation, ProtocolError, ServerMessage};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Socket opening or open, init snapshot not yet received.
    Connecting,
    /// Init snapshot applied; document state is live.
    Joined,
}

/// Connection parameters, passed once at session start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay base URL, e.g. `ws://127.0.0.1:8080`.
    pub server_url: String,
    pub doc_id: String,
    pub user_id: String,
    /// Color echoed in outbound cursor reports.
    pub user_color: String,
}

impl SessionConfig {
    /// Config with a stable color derived from the user id.
    pub fn new(
        server_url: impl Into<String>,
        doc_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let user_color = color_for_user(&user_id);
        Self {
            server_url: server_url.into(),
            doc_id: doc_id.into(),
            user_id,
            user_color,
        }
    }

    /// Full connection URL with identity in the query string.
    fn connect_url(&self) -> String {
        let color = utf8_percent_encode(&self.user_color, NON_ALPHANUMERIC);
        format!(
            "{}/ws/{}?userID={}&color={}",
            self.server_url, self.doc_id, self.user_id, color
        )
    }
}

/// State changes republished to the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Init snapshot applied; the session is live.
    Joined { text: String },
    /// A remote edit changed the document text.
    TextChanged { text: String },
    /// A cursor report changed the presence table.
    PresenceChanged {
        user_id: String,
        entry: PresenceEntry,
    },
    /// The relay closed the connection.
    Disconnected,
}

/// Local edit operations held while the transport is down.
///
/// Bounded FIFO; flushed in order on the next `connect`.
pub struct PendingQueue {
    queue: VecDeque<Operation>,
    max_size: usize,
}

impl PendingQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(256)),
            max_size,
        }
    }

    /// Queue an operation. Returns false when the queue is full.
    pub fn enqueue(&mut self, op: Operation) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    /// Drain all queued operations, oldest first.
    pub fn drain(&mut self) -> Vec<Operation> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The session controller.
///
/// Owns the authoritative local [`TextSnapshot`] and [`PresenceTable`],
/// converts local edits into outbound operations via the diff engine,
/// and folds inbound operations into local state.
pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    text: TextSnapshot,
    presence: PresenceTable,
    pending: PendingQueue,

    /// Frames headed for the websocket writer task.
    outgoing_tx: Option<mpsc::Sender<String>>,
    /// Decoded messages from the websocket reader task. The reader
    /// dropping its sender is the disconnect signal.
    inbound_rx: Option<mpsc::Receiver<ServerMessage>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Create a disconnected session for the given document.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            text: TextSnapshot::default(),
            presence: PresenceTable::new(),
            pending: PendingQueue::new(10_000),
            outgoing_tx: None,
            inbound_rx: None,
            reader_task: None,
            writer_task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current document text.
    pub fn text(&self) -> String {
        self.text.to_text()
    }

    /// Current document snapshot.
    pub fn snapshot(&self) -> &TextSnapshot {
        &self.text
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    /// Presence entries for rendering: everyone except the local user.
    pub fn remote_presence(&self) -> Vec<(String, PresenceEntry)> {
        self.presence
            .remote_entries(&self.config.user_id)
            .map(|(user_id, entry)| (user_id.to_string(), entry.clone()))
            .collect()
    }

    /// Number of operations waiting for the next connect.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn is_open(&self) -> bool {
        self.outgoing_tx.is_some()
    }

    /// Open the relay connection and start the session.
    ///
    /// Spawns the reader and writer tasks and flushes any operations
    /// queued while disconnected. The session stays `Connecting` until
    /// the init snapshot arrives.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.state = SessionState::Connecting;
        let url = self.config.connect_url();

        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("connect to {url} failed: {e}");
                self.state = SessionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        log::info!(
            "connected to {} as {} (doc {})",
            self.config.server_url,
            self.config.user_id,
            self.config.doc_id
        );

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(256);

        // Writer task: forward outbound frames, close the sink when the
        // controller drops its sender.
        self.writer_task = Some(tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        }));

        // Reader task: decode inbound frames; undecodable frames are a
        // transport-boundary concern and never reach the engines.
        self.reader_task = Some(tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(frame)) => match ServerMessage::decode(frame.as_str()) {
                        Ok(decoded) => {
                            if in_tx.send(decoded).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("dropping undecodable frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            // in_tx drops here, signalling disconnect.
        }));

        self.outgoing_tx = Some(out_tx);
        self.inbound_rx = Some(in_rx);

        let queued = self.pending.drain();
        if !queued.is_empty() {
            log::info!("flushing {} queued operations", queued.len());
            for op in queued {
                self.send_or_queue(op).await?;
            }
        }

        Ok(())
    }

    /// Report a full-buffer replacement from the rendering surface.
    ///
    /// The new text is always adopted locally. Resulting operations go
    /// out immediately when the transport is open, otherwise into the
    /// pending queue.
    pub async fn local_edit(&mut self, new_text: &str) -> Result<(), ProtocolError> {
        let new_snapshot = TextSnapshot::new(new_text);
        let ops = diff(
            &self.text,
            &new_snapshot,
            &self.config.doc_id,
            &self.config.user_id,
        );
        self.text = new_snapshot;
        for op in ops {
            self.send_or_queue(op).await?;
        }
        Ok(())
    }

    /// Report the local caret position.
    ///
    /// Sent immediately, without diffing; dropped silently when the
    /// transport is down.
    pub async fn local_cursor(&mut self, cursor_pos: usize) -> Result<(), ProtocolError> {
        let op = Operation::cursor(
            &self.config.doc_id,
            &self.config.user_id,
            cursor_pos,
            &self.config.user_color,
        );
        if let Some(tx) = &self.outgoing_tx {
            let frame = op.encode()?;
            if tx.send(frame).await.is_err() {
                self.outgoing_tx = None;
            }
        }
        Ok(())
    }

    async fn send_or_queue(&mut self, op: Operation) -> Result<(), ProtocolError> {
        if let Some(tx) = &self.outgoing_tx {
            let frame = op.encode()?;
            if tx.send(frame).await.is_ok() {
                return Ok(());
            }
            // Writer task is gone; fall through to the queue.
            self.outgoing_tx = None;
        }
        if self.pending.enqueue(op) {
            Ok(())
        } else {
            Err(ProtocolError::QueueFull)
        }
    }

    /// Wait for the next inbound message, fold it into local state,
    /// and describe the change for the rendering surface.
    ///
    /// Yields [`SessionEvent::Disconnected`] once when the relay
    /// closes the connection, and `None` on every call after that.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let msg = match self.inbound_rx.as_mut()?.recv().await {
                Some(msg) => msg,
                None => {
                    self.inbound_rx = None;
                    self.outgoing_tx = None;
                    self.state = SessionState::Disconnected;
                    log::info!("disconnected from doc {}", self.config.doc_id);
                    return Some(SessionEvent::Disconnected);
                }
            };
            if let Some(event) = self.dispatch(msg) {
                return Some(event);
            }
        }
    }

    /// Fold one inbound message into local state.
    ///
    /// Returns `None` for messages that change nothing worth
    /// republishing: wrong-document traffic and echoes of our own
    /// edits (already applied locally at diff time).
    fn dispatch(&mut self, msg: ServerMessage) -> Option<SessionEvent> {
        match msg {
            ServerMessage::Init(state) => {
                if state.doc_id != self.config.doc_id {
                    log::warn!(
                        "init for doc {} on a session for doc {}",
                        state.doc_id,
                        self.config.doc_id
                    );
                    return None;
                }
                self.text = TextSnapshot::new(&state.text);
                self.presence = PresenceTable::from_init(&state.presence);
                self.state = SessionState::Joined;
                log::info!(
                    "joined doc {} ({} units, {} peers)",
                    state.doc_id,
                    self.text.len(),
                    self.presence.len()
                );
                Some(SessionEvent::Joined {
                    text: self.text.to_text(),
                })
            }
            ServerMessage::Op(op) => {
                if op.doc_id() != self.config.doc_id {
                    log::debug!("ignoring operation for doc {}", op.doc_id());
                    return None;
                }
                match &op {
                    Operation::Cursor { source, .. } => {
                        // Own reports are stored too (the table is
                        // storage, not rendering), so an echoing relay
                        // behaves the same as a filtering one.
                        let user_id = source.clone();
                        self.presence.merge_cursor(&op);
                        let entry = self.presence.get(&user_id)?.clone();
                        Some(SessionEvent::PresenceChanged { user_id, entry })
                    }
                    _ => {
                        if op.source() == self.config.user_id {
                            return None;
                        }
                        let next = apply_operation(&self.text, &op);
                        if next == self.text {
                            // Stale offset; application degraded to the
                            // identity.
                            log::debug!("operation {} changed nothing", op.operation_id());
                            return None;
                        }
                        self.text = next;
                        Some(SessionEvent::TextChanged {
                            text: self.text.to_text(),
                        })
                    }
                }
            }
        }
    }

    /// Close the relay connection and end the session.
    ///
    /// Dropping the outbound sender lets the writer task drain and
    /// close the socket; the reader is aborted outright.
    pub async fn close(&mut self) {
        self.outgoing_tx = None;
        self.inbound_rx = None;
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.writer_task.take() {
            // Finishes on its own once the sender is gone.
            let _ = handle;
        }
        self.state = SessionState::Disconnected;
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(handle) = &self.reader_task {
            handle.abort();
        }
        if let Some(handle) = &self.writer_task {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DocumentState, PresenceInfo};
    use std::collections::HashMap;

    fn controller() -> SessionController {
        SessionController::new(SessionConfig::new("ws://127.0.0.1:1", "mydoc", "me"))
    }

    fn init_msg(doc_id: &str, text: &str) -> ServerMessage {
        ServerMessage::Init(DocumentState {
            doc_id: doc_id.into(),
            text: text.into(),
            presence: HashMap::new(),
        })
    }

    #[test]
    fn test_initial_state() {
        let session = controller();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.text(), "");
        assert_eq!(session.pending_len(), 0);
        assert!(session.presence().is_empty());
    }

    #[test]
    fn test_connect_url_encodes_color() {
        let mut config = SessionConfig::new("ws://host:9", "doc1", "u1");
        config.user_color = "#a1b2c3".into();
        assert_eq!(
            config.connect_url(),
            "ws://host:9/ws/doc1?userID=u1&color=%23a1b2c3"
        );
    }

    #[test]
    fn test_config_derives_stable_color() {
        let a = SessionConfig::new("ws://h", "d", "alice");
        let b = SessionConfig::new("ws://h", "d", "alice");
        assert_eq!(a.user_color, b.user_color);
        assert!(a.user_color.starts_with('#'));
    }

    #[tokio::test]
    async fn test_offline_edit_applies_and_queues() {
        let mut session = controller();
        session.local_edit("hello").await.unwrap();

        // Typing is never blocked.
        assert_eq!(session.text(), "hello");
        // The insert waits for the next connect.
        assert_eq!(session.pending_len(), 1);

        session.local_edit("help").await.unwrap();
        assert_eq!(session.text(), "help");
        // Replace: one delete plus one insert.
        assert_eq!(session.pending_len(), 3);
    }

    #[tokio::test]
    async fn test_offline_cursor_dropped_silently() {
        let mut session = controller();
        session.local_cursor(3).await.unwrap();
        assert_eq!(session.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_pending_queue_overflow() {
        let mut queue = PendingQueue::new(2);
        assert!(queue.enqueue(Operation::insert("d", 0, "a", "u")));
        assert!(queue.enqueue(Operation::insert("d", 1, "b", "u")));
        assert!(!queue.enqueue(Operation::insert("d", 2, "c", "u")));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dispatch_init_joins() {
        let mut session = controller();
        let event = session.dispatch(init_msg("mydoc", "hello"));
        assert_eq!(
            event,
            Some(SessionEvent::Joined {
                text: "hello".into()
            })
        );
        assert_eq!(session.state(), SessionState::Joined);
        assert_eq!(session.text(), "hello");
    }

    #[test]
    fn test_dispatch_init_with_presence() {
        let mut session = controller();
        let mut presence = HashMap::new();
        presence.insert(
            "other".to_string(),
            PresenceInfo {
                user_id: "other".into(),
                user_color: "#333333".into(),
                cursor_pos: 1,
            },
        );
        session.dispatch(ServerMessage::Init(DocumentState {
            doc_id: "mydoc".into(),
            text: "abc".into(),
            presence,
        }));
        assert_eq!(session.presence().len(), 1);
        assert_eq!(session.remote_presence().len(), 1);
    }

    #[test]
    fn test_dispatch_init_for_other_doc_ignored() {
        let mut session = controller();
        assert_eq!(session.dispatch(init_msg("otherdoc", "x")), None);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_dispatch_remote_insert() {
        let mut session = controller();
        session.dispatch(init_msg("mydoc", "hello"));

        let op = Operation::insert("mydoc", 5, " world", "other");
        let event = session.dispatch(ServerMessage::Op(op));
        assert_eq!(
            event,
            Some(SessionEvent::TextChanged {
                text: "hello world".into()
            })
        );
    }

    #[test]
    fn test_dispatch_stale_op_yields_no_event() {
        let mut session = controller();
        session.dispatch(init_msg("mydoc", "hi"));

        let op = Operation::insert("mydoc", 100, "x", "other");
        assert_eq!(session.dispatch(ServerMessage::Op(op)), None);
        assert_eq!(session.text(), "hi");
    }

    #[test]
    fn test_dispatch_own_edit_echo_ignored() {
        let mut session = controller();
        session.dispatch(init_msg("mydoc", "hello"));

        let op = Operation::insert("mydoc", 5, "!", "me");
        assert_eq!(session.dispatch(ServerMessage::Op(op)), None);
        assert_eq!(session.text(), "hello");
    }

    #[test]
    fn test_dispatch_wrong_doc_op_ignored() {
        let mut session = controller();
        session.dispatch(init_msg("mydoc", "hello"));

        let op = Operation::insert("otherdoc", 0, "x", "other");
        assert_eq!(session.dispatch(ServerMessage::Op(op)), None);
        assert_eq!(session.text(), "hello");
    }

    #[test]
    fn test_dispatch_cursor_updates_presence() {
        let mut session = controller();
        session.dispatch(init_msg("mydoc", "hello"));

        let op = Operation::cursor("mydoc", "other", 4, "#00ff00");
        let event = session.dispatch(ServerMessage::Op(op));
        assert_eq!(
            event,
            Some(SessionEvent::PresenceChanged {
                user_id: "other".into(),
                entry: PresenceEntry {
                    user_color: "#00ff00".into(),
                    cursor_pos: 4,
                },
            })
        );
    }

    #[test]
    fn test_dispatch_own_cursor_stored_not_rendered() {
        let mut session = controller();
        session.dispatch(init_msg("mydoc", "hello"));

        let op = Operation::cursor("mydoc", "me", 2, "#111111");
        let event = session.dispatch(ServerMessage::Op(op));
        // Stored (and republished)…
        assert!(matches!(event, Some(SessionEvent::PresenceChanged { .. })));
        assert!(session.presence().get("me").is_some());
        // …but excluded from the rendering view.
        assert!(session.remote_presence().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_returns_disconnected() {
        // Nothing listens on this port.
        let mut session =
            SessionController::new(SessionConfig::new("ws://127.0.0.1:1", "mydoc", "me"));
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_next_event_none_when_never_connected() {
        let mut session = controller();
        assert_eq!(session.next_event().await, None);
    }
}
