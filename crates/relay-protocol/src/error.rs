//! Relay error taxonomy and protocol decode errors.

use thiserror::Error;

/// Classification attached to every failure the relay logs.
///
/// None of these are fatal to the process and none are reported back to the
/// originating client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Payload was not a parseable, well-typed message.
    DecodeError,
    /// Writing to a peer's connection failed.
    TransportWriteError,
    /// Operation referenced a session that does not exist.
    InvalidState,
    /// Message was well-formed but not allowed in the connection's state.
    ProtocolViolation,
    /// A connection closed or errored (a normal lifecycle transition).
    ConnectionTermination,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecodeError => "DECODE_ERROR",
            Self::TransportWriteError => "TRANSPORT_WRITE_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::ConnectionTermination => "CONNECTION_TERMINATION",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to turn a frame into a [`crate::RelayMessage`] or back.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("message has no string `type` tag")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::DecodeError
    }
}
