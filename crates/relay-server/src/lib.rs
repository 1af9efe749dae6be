//! Spatial Relay Server: session registry and relay engine.
//!
//! The registry is the single shared piece of state: one entry per joined
//! identity holding its connection handle and last known position. Each
//! connection drives a [`RelayConnection`] that moves through
//! `Connecting → Joined → Closed`, mutating the registry and fanning events
//! out to every other session.

pub mod broadcast;
pub mod error;
pub mod registry;
pub mod relay;

pub use broadcast::{FanOutReport, Recipients, fan_out};
pub use error::{RegistryError, RelayError};
pub use registry::{Admission, SessionRegistry};
pub use relay::{ConnectionState, RelayConfig, RelayConnection, RelayEngine};
