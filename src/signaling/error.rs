//! Error types for the signaling broker.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("room already has a host")]
    RoomHasHost,

    #[error("guest not found")]
    GuestNotFound,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The broker stopped accepting connections.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The peer's write channel is gone.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SignalingError>;
