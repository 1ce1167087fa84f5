//! Per-room state: host slot, guest table, public-key registry, broadcasts.
//!
//! State mutation takes the room's exclusive lock. Broadcasts iterate under
//! the shared lock and queue writes on each participant's buffered transport,
//! so holding the lock for the duration of the fan-out never blocks on I/O.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::crypto;
use super::error::{Result, SignalingError};
use super::types::{Message, Participant, ParticipantsData, Role, RoomStats, Status};

#[derive(Debug)]
struct RoomInner {
    host: Option<Participant>,
    guests: HashMap<String, Participant>,
    /// Projection of per-participant keys, kept separately so a broadcast is
    /// a single snapshot.
    public_keys: HashMap<String, String>,
}

/// A signaling room, keyed by slug. Created lazily on the first join and
/// removed from the registry once the last participant leaves.
#[derive(Debug)]
pub struct Room {
    slug: String,
    created_at: DateTime<Utc>,
    inner: RwLock<RoomInner>,
}

impl Room {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            created_at: Utc::now(),
            inner: RwLock::new(RoomInner {
                host: None,
                guests: HashMap::new(),
                public_keys: HashMap::new(),
            }),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Add a participant. A host takes the host slot and becomes `in_room`;
    /// a guest lands in the guest table as `knocking`. Returns the stored
    /// participant with its status applied.
    pub async fn add_participant(&self, mut participant: Participant) -> Result<Participant> {
        let mut inner = self.inner.write().await;

        match participant.role {
            Role::Host => {
                if inner.host.is_some() {
                    return Err(SignalingError::RoomHasHost);
                }
                participant.status = Status::InRoom;
                inner.host = Some(participant.clone());
            }
            Role::Guest => {
                participant.status = Status::Knocking;
                inner
                    .guests
                    .insert(participant.id.clone(), participant.clone());
            }
        }

        Ok(participant)
    }

    /// Remove whichever slot holds `id`, dropping its public key as well.
    /// Idempotent; returns the removed participant if it was present.
    pub async fn remove_participant(&self, id: &str) -> Option<Participant> {
        let mut inner = self.inner.write().await;
        inner.public_keys.remove(id);

        if inner.host.as_ref().is_some_and(|h| h.id == id) {
            inner.host.take()
        } else {
            inner.guests.remove(id)
        }
    }

    /// Look up a participant by id, host slot first.
    pub async fn get_participant(&self, id: &str) -> Option<Participant> {
        let inner = self.inner.read().await;

        if let Some(host) = &inner.host {
            if host.id == id {
                return Some(host.clone());
            }
        }

        inner.guests.get(id).cloned()
    }

    /// Admit a knocking guest.
    pub async fn allow_guest(&self, guest_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let guest = inner
            .guests
            .get_mut(guest_id)
            .ok_or(SignalingError::GuestNotFound)?;
        guest.status = Status::InRoom;
        Ok(())
    }

    /// Reject a knocking guest: removed from the table, key dropped.
    pub async fn deny_guest(&self, guest_id: &str) -> Result<Participant> {
        let mut inner = self.inner.write().await;
        let mut guest = inner
            .guests
            .remove(guest_id)
            .ok_or(SignalingError::GuestNotFound)?;
        guest.status = Status::Disconnected;
        inner.public_keys.remove(guest_id);
        Ok(guest)
    }

    /// Validate and store a participant's public key, keeping the registry
    /// and the participant record in sync. Only current members get a
    /// registry entry.
    pub async fn save_public_key(&self, participant_id: &str, public_key: &str) -> Result<()> {
        crypto::validate_public_key(public_key)?;

        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let record = match &mut inner.host {
            Some(host) if host.id == participant_id => Some(host),
            _ => inner.guests.get_mut(participant_id),
        };

        if let Some(participant) = record {
            participant.public_key = Some(public_key.to_string());
            inner
                .public_keys
                .insert(participant_id.to_string(), public_key.to_string());
        }

        Ok(())
    }

    /// Defensive snapshot of the key registry.
    pub async fn get_all_public_keys(&self) -> HashMap<String, String> {
        self.inner.read().await.public_keys.clone()
    }

    /// Write to the host (if present) and every `in_room` guest, skipping
    /// `exclude_id`. An empty exclude id means everyone.
    pub async fn broadcast_to_all(&self, message: &Message, exclude_id: &str) {
        let inner = self.inner.read().await;

        if let Some(host) = &inner.host {
            if host.id != exclude_id {
                if let Err(e) = host.conn.send(message) {
                    debug!(room = %self.slug, participant = %host.id, "broadcast write failed: {e}");
                }
            }
        }

        for guest in inner.guests.values() {
            if guest.id != exclude_id && guest.status == Status::InRoom {
                if let Err(e) = guest.conn.send(message) {
                    debug!(room = %self.slug, participant = %guest.id, "broadcast write failed: {e}");
                }
            }
        }
    }

    /// Write to the host only; no-op while the slot is vacant.
    pub async fn broadcast_to_host(&self, message: &Message) {
        let inner = self.inner.read().await;

        if let Some(host) = &inner.host {
            if let Err(e) = host.conn.send(message) {
                debug!(room = %self.slug, participant = %host.id, "host write failed: {e}");
            }
        }
    }

    /// Write to one guest regardless of status (`allow`/`deny` notices must
    /// reach knockers); no-op if the guest is gone.
    pub async fn broadcast_to_guest(&self, guest_id: &str, message: &Message) {
        let inner = self.inner.read().await;

        if let Some(guest) = inner.guests.get(guest_id) {
            if let Err(e) = guest.conn.send(message) {
                debug!(room = %self.slug, participant = %guest_id, "guest write failed: {e}");
            }
        }
    }

    /// Snapshot the key registry and send it to every `in_room` participant
    /// except `exclude_id`.
    pub async fn broadcast_public_keys(&self, exclude_id: &str) {
        let keys = self.get_all_public_keys().await;
        let message = Message::public_keys(&self.slug, keys);
        self.broadcast_to_all(&message, exclude_id).await;
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.read().await;
        inner.host.is_none() && inner.guests.is_empty()
    }

    pub async fn get_participants_data(&self) -> ParticipantsData {
        let inner = self.inner.read().await;
        Self::participants_data_locked(&inner)
    }

    /// One-lock snapshot for the stats endpoint.
    pub async fn stats(&self) -> RoomStats {
        let inner = self.inner.read().await;
        RoomStats {
            slug: self.slug.clone(),
            participants: Self::participants_data_locked(&inner),
            created_at: self.created_at,
            has_host: inner.host.is_some(),
            guests_count: inner.guests.len(),
        }
    }

    /// Close every participant transport (broker shutdown).
    pub async fn close_all(&self) {
        let inner = self.inner.read().await;

        if let Some(host) = &inner.host {
            host.conn.close();
        }
        for guest in inner.guests.values() {
            guest.conn.close();
        }
    }

    fn participants_data_locked(inner: &RoomInner) -> ParticipantsData {
        let count = inner.guests.len() + usize::from(inner.host.is_some());
        ParticipantsData {
            host: inner.host.clone(),
            guests: inner.guests.clone(),
            count,
        }
    }
}
