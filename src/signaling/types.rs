//! Wire types for the signaling protocol.
//!
//! Every message is a JSON envelope `{ type, from?, to?, slug?, data?,
//! timestamp }`. The broker stamps `from`, `slug` and `timestamp` on ingress;
//! client-supplied values for those fields are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::Result;

/// Message types exchanged between clients and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Join,
    Leave,
    /// Guest announces itself to the host.
    Knock,
    /// Host admits a guest.
    Allow,
    /// Host rejects a guest.
    Deny,
    Offer,
    Answer,
    IceCandidate,
    Participants,
    KeyExchange,
    PublicKeys,
    Encrypted,
    Error,
    /// Anything this broker version does not understand.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// Parse the `role` query parameter.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "host" => Some(Role::Host),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Connected,
    Knocking,
    InRoom,
    Disconnected,
}

/// Capability set a connection must provide to the room and handlers.
///
/// The concrete WebSocket transport is injected at the acceptor boundary;
/// tests substitute an in-memory channel implementation.
pub trait Transport: Send + Sync {
    /// Queue a message for delivery. Writes are buffered and never block;
    /// they fail once the connection is gone.
    fn send(&self, message: &Message) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// An admitted or pending room occupant.
#[derive(Clone, Serialize)]
pub struct Participant {
    pub id: String,
    pub role: Role,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Routing handle only; the connection lifecycle is owned by the read loop.
    #[serde(skip)]
    pub conn: Arc<dyn Transport>,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("status", &self.status)
            .field("name", &self.name)
            .field("joined_at", &self.joined_at)
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl Participant {
    pub fn new(id: String, role: Role, name: Option<String>, conn: Arc<dyn Transport>) -> Self {
        Self {
            id,
            role,
            status: Status::Connected,
            name,
            joined_at: Utc::now(),
            public_key: None,
            conn,
        }
    }
}

/// Mint a fresh participant id: 8 random bytes, hex-encoded.
pub fn generate_participant_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Snapshot of a room's membership.
#[derive(Clone, Serialize)]
pub struct ParticipantsData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<Participant>,
    pub guests: HashMap<String, Participant>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

/// Room snapshot served to the HTTP stats endpoint.
#[derive(Clone, Serialize)]
pub struct RoomStats {
    pub slug: String,
    pub participants: ParticipantsData,
    pub created_at: DateTime<Utc>,
    pub has_host: bool,
    pub guests_count: usize,
}

/// Envelope for every wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A bare message of the given type, stamped with the current time.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            from: None,
            to: None,
            slug: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// An `error` message carrying `{ code, message }`.
    pub fn error(code: &str, message: &str) -> Self {
        let mut msg = Self::new(MessageType::Error);
        msg.data = serde_json::to_value(ErrorData {
            code: code.to_string(),
            message: message.to_string(),
        })
        .ok();
        msg
    }

    /// A `participants` snapshot for `slug`.
    pub fn participants(slug: &str, data: &ParticipantsData) -> Self {
        let mut msg = Self::new(MessageType::Participants);
        msg.slug = Some(slug.to_string());
        msg.data = serde_json::to_value(data).ok();
        msg
    }

    /// A `public_keys` snapshot for `slug`.
    pub fn public_keys(slug: &str, keys: HashMap<String, String>) -> Self {
        let mut msg = Self::new(MessageType::PublicKeys);
        msg.slug = Some(slug.to_string());
        msg.data = Some(serde_json::json!({ "keys": keys }));
        msg
    }

    /// A message carrying a participant payload (`knock` / `join`).
    pub fn with_participant(kind: MessageType, slug: &str, participant: &Participant) -> Self {
        let mut msg = Self::new(kind);
        msg.from = Some(participant.id.clone());
        msg.slug = Some(slug.to_string());
        msg.data = serde_json::to_value(participant).ok();
        msg
    }
}
