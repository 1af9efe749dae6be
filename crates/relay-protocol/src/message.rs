//! The tagged player message and its JSON codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{Identity, MessageTypes, Position};

/// Every message exchanged with a client.
///
/// Serialized as a flat JSON object with a `type` discriminator, e.g.
/// `{"type":"playerMove","username":"bob","position":[4,5,6]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// A player announcing itself. Clients may omit `position` to join at
    /// the origin.
    #[serde(rename = "playerJoin")]
    PlayerJoin {
        username: Identity,
        #[serde(default)]
        position: Position,
    },

    #[serde(rename = "playerMove")]
    PlayerMove {
        username: Identity,
        position: Position,
    },

    /// Departure notice. Only the server originates these, except that a
    /// client may send one for itself as an explicit leave.
    #[serde(rename = "playerLeave")]
    PlayerLeave { username: Identity },
}

impl RelayMessage {
    pub fn join(username: impl Into<Identity>, position: Position) -> Self {
        Self::PlayerJoin {
            username: username.into(),
            position,
        }
    }

    pub fn moved(username: impl Into<Identity>, position: Position) -> Self {
        Self::PlayerMove {
            username: username.into(),
            position,
        }
    }

    pub fn leave(username: impl Into<Identity>) -> Self {
        Self::PlayerLeave {
            username: username.into(),
        }
    }

    /// The `type` tag this message is sent under.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayerJoin { .. } => MessageTypes::PLAYER_JOIN,
            Self::PlayerMove { .. } => MessageTypes::PLAYER_MOVE,
            Self::PlayerLeave { .. } => MessageTypes::PLAYER_LEAVE,
        }
    }

    pub fn username(&self) -> &Identity {
        match self {
            Self::PlayerJoin { username, .. }
            | Self::PlayerMove { username, .. }
            | Self::PlayerLeave { username } => username,
        }
    }

    /// Encode as a UTF-8 JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Decode one inbound text frame.
///
/// Unknown tags are reported separately from malformed payloads so the caller
/// can log which of the two it dropped.
pub fn decode(text: &str) -> Result<RelayMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

    let tag = match value.get("type") {
        Some(Value::String(tag)) => tag,
        _ => return Err(ProtocolError::MissingType),
    };
    if !MessageTypes::is_known(tag) {
        return Err(ProtocolError::UnknownType(tag.clone()));
    }

    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}
