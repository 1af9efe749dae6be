use relay_protocol::{ErrorCode, Identity, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no session for identity {0}")]
    UnknownIdentity(Identity),

    #[error("identity {identity} is no longer bound to connection {connection_id}")]
    NotOwner {
        identity: Identity,
        connection_id: String,
    },
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidState
    }
}

/// Why an inbound message was dropped.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{message} is not allowed while {state}")]
    ProtocolViolation {
        message: &'static str,
        state: &'static str,
    },

    #[error("connection bound to {bound} tried to act as {claimed}")]
    IdentityMismatch { bound: Identity, claimed: Identity },
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::ProtocolViolation { .. } | Self::IdentityMismatch { .. } => {
                ErrorCode::ProtocolViolation
            }
        }
    }
}
