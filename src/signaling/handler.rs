//! Per-message policy: admission, WebRTC relay, key exchange, E2EE relay.
//!
//! Unauthorized or malformed messages are dropped without a response; only
//! `key_exchange` surfaces an error back to the sender, because clients need
//! it to make progress.

use std::sync::Arc;

use tracing::{debug, warn};

use super::room::Room;
use super::server::SignalingServer;
use super::types::{Message, MessageType, Participant, Role, Status};

impl SignalingServer {
    pub(crate) async fn handle_message(&self, room: &Arc<Room>, sender_id: &str, message: Message) {
        // The room may be gone already (shutdown raced the read loop).
        if self.get_room(room.slug()).await.is_none() {
            return;
        }

        let Some(sender) = room.get_participant(sender_id).await else {
            return;
        };

        match message.kind {
            MessageType::Allow => self.handle_allow(room, &sender, message).await,
            MessageType::Deny => self.handle_deny(room, &sender, message).await,
            MessageType::Offer | MessageType::Answer | MessageType::IceCandidate => {
                self.handle_webrtc(room, &sender, message).await
            }
            MessageType::KeyExchange => self.handle_key_exchange(room, &sender, message).await,
            MessageType::Encrypted => self.handle_encrypted(room, &sender, message).await,
            other => {
                debug!(kind = ?other, participant = %sender.id, "dropping unhandled message type")
            }
        }
    }

    /// Host admits a knocking guest, then everyone gets a fresh roster. The
    /// roster goes out after the status transition, so any recipient that
    /// sees the guest as `in_room` can immediately route to it.
    async fn handle_allow(&self, room: &Arc<Room>, sender: &Participant, message: Message) {
        if sender.role != Role::Host {
            return;
        }

        let Some(guest_id) = message.data.as_ref().and_then(|d| d.as_str()) else {
            return;
        };

        if let Err(e) = room.allow_guest(guest_id).await {
            debug!(room = %room.slug(), guest = %guest_id, "allow failed: {e}");
            return;
        }

        let mut allow = Message::new(MessageType::Allow);
        allow.from = Some(sender.id.clone());
        allow.to = Some(guest_id.to_string());
        allow.slug = Some(room.slug().to_string());
        room.broadcast_to_guest(guest_id, &allow).await;

        let snapshot = room.get_participants_data().await;
        room.broadcast_to_all(&Message::participants(room.slug(), &snapshot), "")
            .await;
    }

    /// Host rejects a guest. The notice is sent before removal so it still
    /// reaches the knocker, then the guest's transport is closed.
    async fn handle_deny(&self, room: &Arc<Room>, sender: &Participant, message: Message) {
        if sender.role != Role::Host {
            return;
        }

        let Some(guest_id) = message.data.as_ref().and_then(|d| d.as_str()) else {
            return;
        };

        if room.get_participant(guest_id).await.is_none() {
            return;
        }

        let mut deny = Message::new(MessageType::Deny);
        deny.from = Some(sender.id.clone());
        deny.to = Some(guest_id.to_string());
        deny.slug = Some(room.slug().to_string());
        room.broadcast_to_guest(guest_id, &deny).await;

        match room.deny_guest(guest_id).await {
            Ok(guest) => guest.conn.close(),
            Err(e) => debug!(room = %room.slug(), guest = %guest_id, "deny failed: {e}"),
        }
    }

    /// Opaque relay of offer/answer/ice_candidate. Both endpoints must be
    /// `in_room`; a knocking guest can neither send nor be probed for.
    async fn handle_webrtc(&self, room: &Arc<Room>, sender: &Participant, message: Message) {
        if sender.status != Status::InRoom {
            return;
        }

        if let Some(to) = message.to.as_deref().filter(|to| !to.is_empty()) {
            let Some(target) = room.get_participant(to).await else {
                return;
            };
            if target.status != Status::InRoom {
                return;
            }
            match target.role {
                Role::Host => room.broadcast_to_host(&message).await,
                Role::Guest => room.broadcast_to_guest(to, &message).await,
            }
            return;
        }

        room.broadcast_to_all(&message, &sender.id).await;
    }

    /// Store the sender's public key and fan the refreshed registry out to
    /// the room. Accepted from any status so clients can stage their key
    /// while still knocking.
    async fn handle_key_exchange(&self, room: &Arc<Room>, sender: &Participant, message: Message) {
        let Some(public_key) = message
            .data
            .as_ref()
            .and_then(|d| d.get("public_key"))
            .and_then(|k| k.as_str())
        else {
            debug!(participant = %sender.id, "key exchange without public_key");
            return;
        };

        if let Err(e) = room.save_public_key(&sender.id, public_key).await {
            warn!(room = %room.slug(), participant = %sender.id, "rejected public key: {e}");
            let _ = sender
                .conn
                .send(&Message::error("INVALID_PUBLIC_KEY", "Invalid public key format"));
            return;
        }

        debug!(room = %room.slug(), participant = %sender.id, "stored public key");
        room.broadcast_public_keys("").await;
    }

    /// Opaque relay of already-encrypted payloads. Addressing comes from
    /// `data.to`: "all" fans out to the room, otherwise unicast. A target
    /// that matches no `in_room` member is silently dropped.
    async fn handle_encrypted(&self, room: &Arc<Room>, sender: &Participant, message: Message) {
        if sender.status != Status::InRoom {
            return;
        }

        let Some(to) = message
            .data
            .as_ref()
            .and_then(|d| d.get("to"))
            .and_then(|t| t.as_str())
        else {
            return;
        };

        if to == "all" {
            room.broadcast_to_all(&message, &sender.id).await;
            return;
        }

        let Some(target) = room.get_participant(to).await else {
            return;
        };
        if target.status != Status::InRoom {
            return;
        }
        match target.role {
            Role::Host => room.broadcast_to_host(&message).await,
            Role::Guest => room.broadcast_to_guest(to, &message).await,
        }
    }
}
