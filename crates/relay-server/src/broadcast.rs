//! Event fan-out to joined sessions.

use relay_protocol::{Identity, ProtocolError, RelayMessage};
use relay_transport::ConnectionHandle;
use tracing::{debug, warn};

/// Outcome of one fan-out, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    /// Frames queued to an open connection.
    pub delivered: usize,
    /// Targets passed over: the excluded originator or an already-closed handle.
    pub skipped: usize,
    /// Targets whose write failed.
    pub failed: usize,
}

/// Write `frame` to every target except `exclude` (a connection id).
///
/// A failure on one target is logged and skipped; it never stops delivery to
/// the rest and never removes the target from the registry.
pub fn fan_out<'a>(
    targets: impl IntoIterator<Item = (&'a Identity, &'a ConnectionHandle)>,
    frame: &str,
    exclude: Option<&str>,
) -> FanOutReport {
    let mut report = FanOutReport::default();
    for (identity, handle) in targets {
        if exclude == Some(handle.id()) || !handle.is_open() {
            report.skipped += 1;
            continue;
        }
        match handle.send(frame) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(code = %e.code(), "Failed to broadcast to {identity}: {e}");
                report.failed += 1;
            }
        }
    }
    report
}

/// Point-in-time set of live connections, captured under a registry lock by
/// the operation that produced it.
///
/// Fanning out over the set taken together with a registry change keeps the
/// frame consistent with that change: a peer that joins afterwards was synced
/// against the new state, and one that left before is not written to.
#[derive(Debug, Default, Clone)]
pub struct Recipients(Vec<(Identity, ConnectionHandle)>);

impl Recipients {
    pub(crate) fn new(connections: Vec<(Identity, ConnectionHandle)>) -> Self {
        Self(connections)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &ConnectionHandle)> {
        self.0.iter().map(|(identity, handle)| (identity, handle))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode `message` once and send it to every recipient except the
    /// connection `exclude`.
    pub fn broadcast(
        &self,
        message: &RelayMessage,
        exclude: Option<&str>,
    ) -> Result<FanOutReport, ProtocolError> {
        let frame = message.encode()?;
        let report = self.broadcast_raw(&frame, exclude);
        debug!(
            "Broadcast {} for {}: {report:?}",
            message.kind(),
            message.username()
        );
        Ok(report)
    }

    /// Send an already-encoded frame to every recipient except `exclude`.
    pub fn broadcast_raw(&self, frame: &str, exclude: Option<&str>) -> FanOutReport {
        fan_out(self.iter(), frame, exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use relay_protocol::Position;
    use serde_json::{Value, json};

    fn join(registry: &SessionRegistry, name: &str) -> (ConnectionHandle, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (handle, rx) = ConnectionHandle::channel();
        registry.put(Identity::from(name), handle.clone(), Position::origin());
        (handle, rx)
    }

    #[test]
    fn broadcast_reaches_everyone_but_the_originator() {
        let registry = SessionRegistry::new();
        let (alice, mut alice_rx) = join(&registry, "alice");
        let (_bob, mut bob_rx) = join(&registry, "bob");
        let (_carol, mut carol_rx) = join(&registry, "carol");

        let report = registry
            .recipients()
            .broadcast(&RelayMessage::moved("alice", Position::from([1, 1, 1])), Some(alice.id()))
            .unwrap();

        assert_eq!(report, FanOutReport { delivered: 2, skipped: 1, failed: 0 });
        assert!(alice_rx.try_recv().is_err());
        for rx in [&mut bob_rx, &mut carol_rx] {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(
                frame,
                json!({"type": "playerMove", "username": "alice", "position": [1, 1, 1]})
            );
        }
    }

    #[test]
    fn broadcast_without_exclusion_reaches_all() {
        let registry = SessionRegistry::new();
        let (_a, mut a_rx) = join(&registry, "a");
        let (_b, mut b_rx) = join(&registry, "b");

        let report = registry.recipients().broadcast_raw("frame", None);
        assert_eq!(report.delivered, 2);
        assert_eq!(a_rx.try_recv().unwrap(), "frame");
        assert_eq!(b_rx.try_recv().unwrap(), "frame");
    }

    #[test]
    fn dead_peer_does_not_stop_the_fan_out() {
        let registry = SessionRegistry::new();
        let (_p, p_rx) = join(&registry, "p");
        let (_q, mut q_rx) = join(&registry, "q");
        let (_r, mut r_rx) = join(&registry, "r");
        drop(p_rx);

        let report = registry.recipients().broadcast_raw("hello", None);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped + report.failed, 1);
        assert_eq!(q_rx.try_recv().unwrap(), "hello");
        assert_eq!(r_rx.try_recv().unwrap(), "hello");
        // The broadcast primitive never evicts; only close does.
        assert!(registry.contains(&Identity::from("p")));
    }

    #[test]
    fn fan_out_skips_closed_handles() {
        let (open, mut open_rx) = ConnectionHandle::channel();
        let (closed, closed_rx) = ConnectionHandle::channel();
        drop(closed_rx);
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");

        let report = fan_out([(&alice, &open), (&bob, &closed)], "x", None);
        assert_eq!(report, FanOutReport { delivered: 1, skipped: 1, failed: 0 });
        assert_eq!(open_rx.try_recv().unwrap(), "x");
    }

    #[test]
    fn broadcast_on_empty_registry_is_a_no_op() {
        let registry = SessionRegistry::new();
        let report = registry.recipients().broadcast(&RelayMessage::leave("nobody"), None).unwrap();
        assert_eq!(report, FanOutReport::default());
    }
}
