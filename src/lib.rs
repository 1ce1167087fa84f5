pub mod config;
pub mod server;
pub mod signaling;

pub use config::Config;
pub use server::{router, VestibuleServer};
pub use signaling::{Room, SignalingServer};
