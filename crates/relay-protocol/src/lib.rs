//! Spatial Relay - Protocol Types
//!
//! Wire types for the player relay. Every frame is a JSON object carrying a
//! `type` tag; this crate decodes frames into [`RelayMessage`] at the
//! boundary so the rest of the server only ever sees validated values.

pub mod error;
pub mod message;
pub mod types;

pub use error::{ErrorCode, ProtocolError};
pub use message::{RelayMessage, decode};
pub use types::{Identity, MessageTypes, Position};
