//! The broker: slug-to-room registry, connection acceptor, per-connection
//! read loop and lifecycle.
//!
//! Lock ordering is registry first, then room. Room methods never touch the
//! registry, so the ordering cannot invert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::error::{Result, SignalingError};
use super::room::Room;
use super::types::{
    generate_participant_id, Message, MessageType, Participant, Role, RoomStats, Transport,
};

enum WsCommand {
    Frame(String),
    Close,
}

/// Write half of a WebSocket connection. Sends are queued on an unbounded
/// channel and drained by the connection's writer task, so callers never
/// block while holding room locks.
struct WsTransport {
    tx: mpsc::UnboundedSender<WsCommand>,
}

impl Transport for WsTransport {
    fn send(&self, message: &Message) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.tx
            .send(WsCommand::Frame(text))
            .map_err(|_| SignalingError::ConnectionClosed)
    }

    fn close(&self) {
        let _ = self.tx.send(WsCommand::Close);
    }
}

/// The signaling broker. One instance per process; tests create their own
/// for isolation.
pub struct SignalingServer {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    closed: AtomicBool,
}

impl Default for SignalingServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingServer {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Drive an upgraded socket for (slug, role, name): joins the room,
    /// spawns the writer task, then reads until the connection drops and
    /// tears the participant down.
    pub async fn handle_connection(
        self: Arc<Self>,
        socket: WebSocket,
        slug: String,
        role: Role,
        name: Option<String>,
    ) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Writer task: the only place that touches the sink. It drains
        // whatever was queued before the channel closed, so a JOIN_FAILED
        // error still reaches the client.
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WsCommand::Frame(text) => {
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    WsCommand::Close => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let conn: Arc<dyn Transport> = Arc::new(WsTransport { tx });
        let participant = Participant::new(generate_participant_id(), role, name, conn);
        let participant_id = participant.id.clone();

        info!(room = %slug, participant = %participant_id, ?role, "participant connected");

        let room = match self.join_room(&slug, participant).await {
            Ok(room) => room,
            Err(e) => {
                warn!(room = %slug, participant = %participant_id, "join failed: {e}");
                return;
            }
        };

        while let Some(result) = stream.next().await {
            let text = match result {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(participant = %participant_id, "read error: {e}");
                    break;
                }
            };

            let mut message: Message = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(e) => {
                    debug!(participant = %participant_id, "dropping malformed message: {e}");
                    continue;
                }
            };

            // Identity fields are never trusted from the client.
            message.from = Some(participant_id.clone());
            message.slug = Some(slug.clone());
            message.timestamp = Utc::now();

            self.handle_message(&room, &participant_id, message).await;
        }

        self.leave_room(&slug, &participant_id).await;
    }

    /// Join `participant` to the room at `slug`, creating the room on first
    /// use. On failure the joiner gets a `JOIN_FAILED` error and its
    /// transport is closed.
    pub(crate) async fn join_room(&self, slug: &str, participant: Participant) -> Result<Arc<Room>> {
        let mut rooms = self.rooms.write().await;

        if self.closed.load(Ordering::SeqCst) {
            let _ = participant
                .conn
                .send(&Message::error("JOIN_FAILED", "server is shutting down"));
            participant.conn.close();
            return Err(SignalingError::ShuttingDown);
        }

        let room = rooms
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(Room::new(slug)))
            .clone();

        let joined = match room.add_participant(participant.clone()).await {
            Ok(joined) => joined,
            Err(e) => {
                let _ = participant
                    .conn
                    .send(&Message::error("JOIN_FAILED", &e.to_string()));
                participant.conn.close();
                return Err(e);
            }
        };

        match joined.role {
            Role::Guest => {
                let knock = Message::with_participant(MessageType::Knock, slug, &joined);
                room.broadcast_to_host(&knock).await;
            }
            Role::Host => {
                let join = Message::with_participant(MessageType::Join, slug, &joined);
                room.broadcast_to_all(&join, &joined.id).await;
            }
        }

        let snapshot = room.get_participants_data().await;
        let _ = joined.conn.send(&Message::participants(slug, &snapshot));

        Ok(room)
    }

    /// Tear a participant down: drop its key, remove it, close the
    /// transport, notify the rest, and delete the room if it emptied.
    /// Safe to call after the participant is already gone.
    pub(crate) async fn leave_room(&self, slug: &str, participant_id: &str) {
        let mut rooms = self.rooms.write().await;

        let Some(room) = rooms.get(slug).cloned() else {
            return;
        };

        if let Some(participant) = room.remove_participant(participant_id).await {
            participant.conn.close();
        }

        let mut leave = Message::new(MessageType::Leave);
        leave.from = Some(participant_id.to_string());
        leave.slug = Some(slug.to_string());
        room.broadcast_to_all(&leave, participant_id).await;

        room.broadcast_public_keys(participant_id).await;

        if room.is_empty().await {
            rooms.remove(slug);
            info!(room = %slug, "room deleted (empty)");
        }

        info!(room = %slug, participant = %participant_id, "participant left");
    }

    /// Snapshot for the HTTP stats endpoint; `None` for unknown slugs.
    pub async fn get_room_stats(&self, slug: &str) -> Option<RoomStats> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(slug)?;
        Some(room.stats().await)
    }

    /// Current room for a slug, if any.
    pub(crate) async fn get_room(&self, slug: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(slug).cloned()
    }

    /// Close every connection and clear the registry. Later joins are
    /// rejected. Idempotent.
    pub async fn shutdown(&self) {
        let mut rooms = self.rooms.write().await;
        self.closed.store(true, Ordering::SeqCst);

        for room in rooms.values() {
            room.close_all().await;
        }
        rooms.clear();

        info!("signaling server shut down");
    }
}
