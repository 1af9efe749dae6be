//! Relay Engine: per-connection protocol state machine.
//!
//! A connection starts in [`ConnectionState::Connecting`]. Its first
//! `playerJoin` binds an identity and moves it to `Joined`; from there it
//! relays `playerMove`s until it closes, errors, or sends `playerLeave`,
//! which purges its session and announces the departure. Anything else is
//! dropped and logged without changing state.

use std::sync::Arc;

use relay_protocol::{Identity, MessageTypes, Position, RelayMessage, decode};
use relay_transport::{ConnectionHandle, ConnectionLifecycle, Flow, RelayHandler};
use tracing::{debug, error, info, warn};

use crate::broadcast::fan_out;
use crate::error::RelayError;
use crate::registry::SessionRegistry;

/// Relay behaviour switches.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Reject `playerMove`s whose `username` differs from the identity the
    /// connection joined as. Off by default: the username is trusted as sent.
    pub enforce_identity: bool,
}

/// Owns the shared registry and opens a [`RelayConnection`] per socket.
pub struct RelayEngine {
    registry: Arc<SessionRegistry>,
    config: RelayConfig,
}

impl RelayEngine {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_config(registry, RelayConfig::default())
    }

    pub fn with_config(registry: Arc<SessionRegistry>, config: RelayConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start the state machine for a newly opened connection.
    pub fn open(&self, handle: ConnectionHandle) -> RelayConnection {
        RelayConnection {
            registry: self.registry.clone(),
            config: self.config.clone(),
            handle,
            state: ConnectionState::Connecting,
        }
    }
}

impl RelayHandler for RelayEngine {
    type Connection = RelayConnection;

    fn connect(&self, handle: ConnectionHandle) -> RelayConnection {
        self.open(handle)
    }

    fn session_count(&self) -> usize {
        self.registry.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, no identity bound yet.
    Connecting,
    /// Identity bound and registered.
    Joined(Identity),
    /// Terminal; the session (if any) has been purged.
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Joined(_) => "joined",
            Self::Closed => "closed",
        }
    }
}

/// One client's protocol state. Dropping it runs the close transition if
/// the transport never reported one.
pub struct RelayConnection {
    registry: Arc<SessionRegistry>,
    config: RelayConfig,
    handle: ConnectionHandle,
    state: ConnectionState,
}

impl RelayConnection {
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Identity bound to this connection, once joined.
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            ConnectionState::Joined(identity) => Some(identity),
            _ => None,
        }
    }

    /// Decode and dispatch one inbound frame.
    pub fn handle_text(&mut self, text: &str) -> Result<Flow, RelayError> {
        match decode(text)? {
            RelayMessage::PlayerJoin { username, position } => self.on_join(username, position),
            RelayMessage::PlayerMove { username, position } => {
                self.on_move(username, position, text)
            }
            RelayMessage::PlayerLeave { username } => self.on_leave(username),
        }
    }

    /// The transport reported the socket closed.
    pub fn handle_close(&mut self) {
        self.terminate("closed");
    }

    /// The transport reported the socket failed.
    pub fn handle_error(&mut self, reason: &str) {
        warn!(code = %relay_protocol::ErrorCode::ConnectionTermination, "Connection {} errored: {reason}", self.handle.id());
        self.terminate("errored");
    }

    fn violation(&self, message: &'static str) -> RelayError {
        RelayError::ProtocolViolation {
            message,
            state: self.state.name(),
        }
    }

    fn on_join(&mut self, username: Identity, position: Position) -> Result<Flow, RelayError> {
        if self.state != ConnectionState::Connecting {
            return Err(self.violation(MessageTypes::PLAYER_JOIN));
        }

        let announce = RelayMessage::join(username.clone(), position.clone()).encode()?;

        // Announce and sync under one registry write lock: no broadcast from
        // another connection can reach this one before its sync is queued.
        let admission = self.registry.admit(username.clone(), self.handle.clone(), position);
        if let Some(previous) = admission.displaced() {
            warn!(
                "Identity {username} re-joined on {}; connection {} no longer receives updates",
                self.handle.id(),
                previous.id()
            );
        }

        let announced = fan_out(
            admission.peers().map(|(identity, handle, _)| (identity, handle)),
            &announce,
            Some(self.handle.id()),
        );

        self.state = ConnectionState::Joined(username.clone());

        let mut synced = 0;
        for (peer, _, peer_position) in admission.peers() {
            let frame = match RelayMessage::join(peer.clone(), peer_position.clone()).encode() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(code = %e.code(), "Failed to encode sync of {peer} for {username}: {e}");
                    continue;
                }
            };
            if let Err(e) = self.handle.send(frame) {
                warn!(code = %e.code(), "Initial sync to {username} aborted: {e}");
                break;
            }
            synced += 1;
        }
        drop(admission);

        info!(
            "Player joined: {username} on {} (announced to {}, synced {synced} peers)",
            self.handle.id(),
            announced.delivered
        );
        Ok(Flow::Continue)
    }

    fn on_move(&mut self, username: Identity, position: Position, raw: &str) -> Result<Flow, RelayError> {
        let bound = match &self.state {
            ConnectionState::Joined(identity) => identity.clone(),
            _ => return Err(self.violation(MessageTypes::PLAYER_MOVE)),
        };

        if username != bound {
            if self.config.enforce_identity {
                return Err(RelayError::IdentityMismatch {
                    bound,
                    claimed: username,
                });
            }
            debug!("Connection {} ({bound}) moved {username}", self.handle.id());
        }

        // Fails with NotOwner once a later join has taken the identity over;
        // an orphaned connection's moves go nowhere.
        let recipients =
            self.registry
                .update_position_from(&bound, self.handle.id(), &username, position)?;
        let report = recipients.broadcast_raw(raw, Some(self.handle.id()));
        debug!("Relayed move of {username} to {} peers", report.delivered);
        Ok(Flow::Continue)
    }

    fn on_leave(&mut self, username: Identity) -> Result<Flow, RelayError> {
        let bound = match &self.state {
            ConnectionState::Joined(identity) => identity.clone(),
            _ => return Err(self.violation(MessageTypes::PLAYER_LEAVE)),
        };
        if username != bound {
            debug!("Leave from {bound} named {username}; leaving as {bound}");
        }
        self.terminate("left");
        Ok(Flow::Close)
    }

    /// Move to `Closed`, purging the session and announcing the departure if
    /// this connection still owned its identity.
    fn terminate(&mut self, reason: &str) {
        let ConnectionState::Joined(identity) =
            std::mem::replace(&mut self.state, ConnectionState::Closed)
        else {
            return;
        };

        // The leave goes to the sessions left at the moment of removal; a
        // client joining afterwards was never synced with this one.
        let Some(remaining) = self.registry.remove_owned(&identity, self.handle.id()) else {
            info!(
                "Connection {} {reason} after {identity} moved to another connection",
                self.handle.id()
            );
            return;
        };

        match remaining.broadcast(&RelayMessage::leave(identity.clone()), None) {
            Ok(report) => info!(
                "Player left: {identity} ({reason}, notified {} peers)",
                report.delivered
            ),
            Err(e) => error!(code = %e.code(), "Failed to announce departure of {identity}: {e}"),
        }
    }
}

impl ConnectionLifecycle for RelayConnection {
    fn on_message(&mut self, text: &str) -> Flow {
        match self.handle_text(text) {
            Ok(flow) => flow,
            Err(e) => {
                warn!(code = %e.code(), "Dropped message from {}: {e}", self.handle.id());
                Flow::Continue
            }
        }
    }

    fn on_close(&mut self) {
        self.handle_close();
    }

    fn on_error(&mut self, error: &str) {
        self.handle_error(error);
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.terminate("dropped");
    }
}
