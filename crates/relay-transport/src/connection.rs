//! Connection handle: the write side of one client channel.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::TransportError;

/// Unique, server-assigned id for one transport connection.
pub type ConnectionId = String;

/// Write handle for a connected client.
///
/// Frames pushed into the handle are queued and written to the socket by the
/// connection's writer task, so `send` never waits on the network. Once the
/// writer stops (socket closed or a write failed) the handle reports itself
/// closed and every further `send` fails.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end its writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<ConnectionId>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: id.into(), tx }, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the writer side is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue one encoded text frame for this client.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(frame.into())
            .map_err(|_| TransportError::ChannelClosed(self.id.clone()))
    }

    /// Two handles are the same connection when they share an id.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
