//! SessionRegistry: identity → (connection, last position).

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockWriteGuard};
use relay_protocol::{Identity, Position};
use relay_transport::ConnectionHandle;
use tracing::debug;

use crate::broadcast::Recipients;
use crate::error::RegistryError;

/// Internal entry. Handle and position live and die together.
struct SessionEntry {
    handle: ConnectionHandle,
    position: Position,
}

/// Process-wide table of joined sessions.
///
/// Built once at startup and shared by `Arc` with every connection task.
/// Uses parking_lot::RwLock; the lock is never held across an `.await`, and
/// iteration always works on a snapshot so callbacks may mutate the registry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Identity, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the session for `identity`.
    pub fn put(&self, identity: Identity, handle: ConnectionHandle, position: Position) {
        drop(self.admit(identity, handle, position));
    }

    /// Insert or overwrite the session for `identity` and keep the registry
    /// write-locked until the returned [`Admission`] is dropped.
    ///
    /// While the admission is alive no other task can take a snapshot, so
    /// anything queued to the peers or to the new connection through it lands
    /// ahead of any broadcast that can see the new session.
    pub fn admit(
        &self,
        identity: Identity,
        handle: ConnectionHandle,
        position: Position,
    ) -> Admission<'_> {
        let mut sessions = self.sessions.write();
        let displaced = sessions
            .insert(identity.clone(), SessionEntry { handle, position })
            .map(|entry| entry.handle);
        debug!("Session stored: {identity} ({} live)", sessions.len());
        Admission {
            sessions,
            identity,
            displaced,
        }
    }

    /// Overwrite the stored position of an existing session.
    pub fn update_position(&self, identity: &Identity, position: Position) -> Result<(), RegistryError> {
        match self.sessions.write().get_mut(identity) {
            Some(entry) => {
                entry.position = position;
                Ok(())
            }
            None => Err(RegistryError::UnknownIdentity(identity.clone())),
        }
    }

    /// Delete the session for `identity`. Removing an absent identity is a
    /// no-op; returns whether anything was removed.
    pub fn remove(&self, identity: &Identity) -> bool {
        let removed = self.sessions.write().remove(identity).is_some();
        if removed {
            debug!("Session removed: {identity}");
        }
        removed
    }

    /// Delete the session for `identity` only if it is still bound to
    /// `connection_id`. A connection whose identity was taken over by a later
    /// join must not evict its successor.
    ///
    /// On removal returns the remaining sessions, captured under the same
    /// write lock, so the departure can be announced to exactly the peers that
    /// could have seen the session.
    pub fn remove_owned(&self, identity: &Identity, connection_id: &str) -> Option<Recipients> {
        let mut sessions = self.sessions.write();
        match sessions.get(identity) {
            Some(entry) if entry.handle.id() == connection_id => {
                sessions.remove(identity);
                debug!("Session removed: {identity} ({} live)", sessions.len());
                Some(Self::collect_recipients(&sessions))
            }
            _ => None,
        }
    }

    /// Record a move sent by `connection_id`, which joined as `owner`, for
    /// `target`.
    ///
    /// Ownership is checked and the position written under one write lock, so
    /// a connection displaced by a later join can never overwrite its
    /// successor's position. Returns the live sessions at that instant, the
    /// set the move is relayed to.
    pub fn update_position_from(
        &self,
        owner: &Identity,
        connection_id: &str,
        target: &Identity,
        position: Position,
    ) -> Result<Recipients, RegistryError> {
        let mut sessions = self.sessions.write();
        if !sessions
            .get(owner)
            .is_some_and(|entry| entry.handle.id() == connection_id)
        {
            return Err(RegistryError::NotOwner {
                identity: owner.clone(),
                connection_id: connection_id.to_string(),
            });
        }
        match sessions.get_mut(target) {
            Some(entry) => entry.position = position,
            None => return Err(RegistryError::UnknownIdentity(target.clone())),
        }
        Ok(Self::collect_recipients(&sessions))
    }

    /// Point-in-time copy of every (identity, position), optionally leaving
    /// one identity out. Sorted by identity.
    pub fn snapshot_all(&self, exclude: Option<&Identity>) -> Vec<(Identity, Position)> {
        let mut snapshot: Vec<_> = self
            .sessions
            .read()
            .iter()
            .filter(|(identity, _)| Some(*identity) != exclude)
            .map(|(identity, entry)| (identity.clone(), entry.position.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// Point-in-time copy of every live (identity, handle).
    pub fn recipients(&self) -> Recipients {
        Self::collect_recipients(&self.sessions.read())
    }

    fn collect_recipients(sessions: &HashMap<Identity, SessionEntry>) -> Recipients {
        Recipients::new(
            sessions
                .iter()
                .map(|(identity, entry)| (identity.clone(), entry.handle.clone()))
                .collect(),
        )
    }

    /// Apply `f` to every live (identity, handle). Runs over a snapshot taken
    /// up front, so `f` may add or remove sessions.
    pub fn for_each_connection(&self, mut f: impl FnMut(&Identity, &ConnectionHandle)) {
        for (identity, handle) in self.recipients().iter() {
            f(identity, handle);
        }
    }

    pub fn connection(&self, identity: &Identity) -> Option<ConnectionHandle> {
        self.sessions.read().get(identity).map(|entry| entry.handle.clone())
    }

    pub fn position(&self, identity: &Identity) -> Option<Position> {
        self.sessions.read().get(identity).map(|entry| entry.position.clone())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.sessions.read().contains_key(identity)
    }

    /// Sorted list of joined identities.
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<_> = self.sessions.read().keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// A freshly stored session with the registry still write-locked.
pub struct Admission<'a> {
    sessions: RwLockWriteGuard<'a, HashMap<Identity, SessionEntry>>,
    identity: Identity,
    displaced: Option<ConnectionHandle>,
}

impl Admission<'_> {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The handle previously bound to this identity, if the join overwrote one.
    pub fn displaced(&self) -> Option<&ConnectionHandle> {
        self.displaced.as_ref()
    }

    /// Every session other than the one just admitted.
    pub fn peers(&self) -> impl Iterator<Item = (&Identity, &ConnectionHandle, &Position)> {
        self.sessions
            .iter()
            .filter(|(identity, _)| **identity != self.identity)
            .map(|(identity, entry)| (identity, &entry.handle, &entry.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::from(name)
    }

    #[test]
    fn put_then_lookup() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.put(id("alice"), handle.clone(), Position::from([1, 2, 3]));

        assert!(registry.contains(&id("alice")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.position(&id("alice")), Some(Position::from([1, 2, 3])));
        assert!(registry.connection(&id("alice")).unwrap().same_connection(&handle));
    }

    #[test]
    fn put_overwrites_handle_and_position() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = ConnectionHandle::channel();
        let (second, _rx2) = ConnectionHandle::channel();

        registry.put(id("alice"), first.clone(), Position::from([0, 0, 0]));
        let admission = registry.admit(id("alice"), second.clone(), Position::from([9, 9, 9]));
        assert!(admission.displaced().unwrap().same_connection(&first));
        drop(admission);

        assert_eq!(registry.len(), 1);
        assert!(registry.connection(&id("alice")).unwrap().same_connection(&second));
        assert_eq!(registry.position(&id("alice")), Some(Position::from([9, 9, 9])));
        assert!(!registry.connection(&id("alice")).unwrap().same_connection(&first));
    }

    #[test]
    fn update_position_of_unknown_identity_is_rejected() {
        let registry = SessionRegistry::new();
        let err = registry
            .update_position(&id("ghost"), Position::from([1, 1, 1]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownIdentity(ref who) if who == "ghost"));
        assert!(registry.is_empty());
        assert!(registry.position(&id("ghost")).is_none());
    }

    #[test]
    fn update_position_keeps_only_latest() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.put(id("bob"), handle, Position::from([1, 2, 3]));
        registry.update_position(&id("bob"), Position::from([4, 5, 6])).unwrap();
        registry.update_position(&id("bob"), Position::from([7, 8, 9])).unwrap();
        assert_eq!(registry.snapshot_all(None), vec![(id("bob"), Position::from([7, 8, 9]))]);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.put(id("bob"), handle, Position::origin());

        assert!(registry.remove(&id("bob")));
        assert!(!registry.remove(&id("bob")));
        assert!(!registry.remove(&id("never-joined")));
        assert!(registry.is_empty());
        assert!(registry.position(&id("bob")).is_none());
    }

    #[test]
    fn remove_owned_spares_a_successor() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = ConnectionHandle::channel();
        let (new, _rx2) = ConnectionHandle::channel();
        registry.put(id("alice"), old.clone(), Position::origin());
        registry.put(id("alice"), new.clone(), Position::origin());

        assert!(registry.remove_owned(&id("alice"), old.id()).is_none());
        assert!(registry.contains(&id("alice")));
        assert!(registry.remove_owned(&id("alice"), new.id()).is_some());
        assert!(!registry.contains(&id("alice")));
    }

    #[test]
    fn remove_owned_returns_the_remaining_sessions() {
        let registry = SessionRegistry::new();
        let (alice, _rx1) = ConnectionHandle::channel();
        let (bob, _rx2) = ConnectionHandle::channel();
        registry.put(id("alice"), alice.clone(), Position::origin());
        registry.put(id("bob"), bob, Position::origin());

        let remaining = registry.remove_owned(&id("alice"), alice.id()).unwrap();
        let names: Vec<_> = remaining.iter().map(|(identity, _)| identity.clone()).collect();
        assert_eq!(names, vec![id("bob")]);
    }

    #[test]
    fn update_from_a_displaced_connection_leaves_the_successor_untouched() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = ConnectionHandle::channel();
        let (new, _rx2) = ConnectionHandle::channel();
        registry.put(id("alice"), old.clone(), Position::origin());

        registry
            .update_position_from(&id("alice"), old.id(), &id("alice"), Position::from([1, 1, 1]))
            .unwrap();
        // The identity is taken over; the old connection's next move is refused.
        registry.put(id("alice"), new, Position::from([5, 5, 5]));
        let err = registry
            .update_position_from(&id("alice"), old.id(), &id("alice"), Position::from([9, 9, 9]))
            .unwrap_err();

        assert!(matches!(err, RegistryError::NotOwner { ref identity, .. } if identity == "alice"));
        assert_eq!(registry.position(&id("alice")), Some(Position::from([5, 5, 5])));
    }

    #[test]
    fn update_from_checks_owner_then_target() {
        let registry = SessionRegistry::new();
        let (alice, _rx1) = ConnectionHandle::channel();
        let (bob, _rx2) = ConnectionHandle::channel();
        registry.put(id("alice"), alice.clone(), Position::origin());
        registry.put(id("bob"), bob, Position::origin());

        // A joined connection may move another live identity.
        let recipients = registry
            .update_position_from(&id("alice"), alice.id(), &id("bob"), Position::from([2, 0, 0]))
            .unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(registry.position(&id("bob")), Some(Position::from([2, 0, 0])));

        // But not one that is not registered.
        let err = registry
            .update_position_from(&id("alice"), alice.id(), &id("ghost"), Position::origin())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownIdentity(ref who) if who == "ghost"));
        assert!(registry.position(&id("ghost")).is_none());

        // A connection that never joined owns nothing.
        let (stranger, _rx3) = ConnectionHandle::channel();
        let err = registry
            .update_position_from(&id("alice"), stranger.id(), &id("alice"), Position::origin())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotOwner { .. }));
    }

    #[test]
    fn snapshot_excludes_requested_identity() {
        let registry = SessionRegistry::new();
        for (name, x) in [("carol", 3), ("alice", 1), ("bob", 2)] {
            let (handle, _rx) = ConnectionHandle::channel();
            registry.put(id(name), handle, Position::from([x, 0, 0]));
        }

        let snapshot = registry.snapshot_all(Some(&id("bob")));
        assert_eq!(
            snapshot,
            vec![
                (id("alice"), Position::from([1, 0, 0])),
                (id("carol"), Position::from([3, 0, 0])),
            ]
        );
        assert_eq!(registry.identities(), vec![id("alice"), id("bob"), id("carol")]);
    }

    #[test]
    fn for_each_connection_tolerates_removal_during_iteration() {
        let registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let (handle, rx) = ConnectionHandle::channel();
            receivers.push(rx);
            registry.put(id(name), handle, Position::origin());
        }

        let mut visited = Vec::new();
        registry.for_each_connection(|identity, _| {
            visited.push(identity.clone());
            // Removing everyone mid-traversal must neither deadlock nor
            // shorten the traversal already in progress.
            for name in ["a", "b", "c", "d"] {
                registry.remove(&id(name));
            }
        });

        visited.sort();
        assert_eq!(visited, vec![id("a"), id("b"), id("c"), id("d")]);
        assert!(registry.is_empty());
    }

    #[test]
    fn admission_peers_skip_the_admitted_identity() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::channel();
        let (b, _rx_b) = ConnectionHandle::channel();
        registry.put(id("alice"), a, Position::from([0, 0, 0]));

        let admission = registry.admit(id("bob"), b, Position::from([1, 2, 3]));
        let peers: Vec<_> = admission
            .peers()
            .map(|(identity, _, position)| (identity.clone(), position.clone()))
            .collect();
        assert_eq!(admission.identity(), &id("bob"));
        assert!(admission.displaced().is_none());
        assert_eq!(peers, vec![(id("alice"), Position::from([0, 0, 0]))]);
    }
}
