//! Transport errors.

use relay_protocol::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection's writer has gone away; nothing can be delivered.
    #[error("connection {0} is closed")]
    ChannelClosed(String),

    #[error("invalid listen address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ChannelClosed(_) => ErrorCode::TransportWriteError,
            Self::InvalidAddress { .. } | Self::Io(_) => ErrorCode::ConnectionTermination,
        }
    }
}
