//! Host-gated WebRTC signaling: rooms, admission, key registry, relay.

pub mod crypto;
pub mod error;
mod handler;
pub mod room;
pub mod server;
pub mod types;


pub use error::{Result, SignalingError};
pub use room::Room;
pub use server::SignalingServer;
pub use types::{
    generate_participant_id, ErrorData, Message, MessageType, Participant, ParticipantsData, Role,
    RoomStats, Status, Transport,
};
