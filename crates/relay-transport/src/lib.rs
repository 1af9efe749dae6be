//! Spatial Relay Transport Layer
//!
//! Hosts the relay over HTTP. The transport layer handles:
//! - WebSocket upgrade on `/ws` and the `/health` probe
//! - Connection lifecycle (open, message, close, error)
//! - A per-connection outbound queue drained by a writer task
//!
//! The transport is decoupled from relay logic via the [`RelayHandler`] and
//! [`ConnectionLifecycle`] traits.

pub mod connection;
pub mod error;
pub mod server;

pub use connection::{ConnectionHandle, ConnectionId};
pub use error::TransportError;
pub use server::{ConnectionLifecycle, Flow, RelayHandler, TransportConfig, TransportServer};
