use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Items queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Event(GatewayEvent),
    /// Ask the writer to close the socket.
    Close,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {conn_id} is closed")]
    Closed { conn_id: Uuid },
}

/// Sending half of one live client connection.
///
/// Cloning yields another reference to the same connection. Pushes are
/// queued in order and never block.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event. Fails once the writer side has gone away.
    pub fn push(&self, event: GatewayEvent) -> Result<(), DeliveryError> {
        self.send(Outbound::Event(event))
    }

    pub fn close(&self) -> Result<(), DeliveryError> {
        self.send(Outbound::Close)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, item: Outbound) -> Result<(), DeliveryError> {
        self.tx.send(item).map_err(|_| DeliveryError::Closed {
            conn_id: self.conn_id,
        })
    }
}

/// Who is reachable right now: user id -> the one live connection for it.
///
/// Cheap to clone; all clones share the same map. Every operation takes the
/// lock for a single map access, so readers never observe partial updates.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` for `user_id`, replacing any previous mapping.
    /// The replaced handle is returned and left open.
    pub fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, handle)
    }

    /// Remove whatever mapping exists for `user_id`. No-op if absent.
    pub fn unregister(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id)
    }

    /// Remove the mapping only if it still points at `conn_id`, so a late
    /// close from a superseded connection leaves its replacement alone.
    pub fn unregister_if_current(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match map.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                map.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    /// Point-in-time copy of the online user set.
    pub fn snapshot(&self) -> HashSet<Uuid> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Run `f` against the live map under the read lock. Writers wait until
    /// `f` returns, so whatever it queues reflects a single registry state.
    pub(crate) fn with_connections<R>(
        &self,
        f: impl FnOnce(&HashMap<Uuid, ConnectionHandle>) -> R,
    ) -> R {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&map)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_updates_snapshot() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::new();

        registry.register(user, handle);
        assert!(registry.snapshot().contains(&user));

        registry.unregister(user);
        assert!(!registry.snapshot().contains(&user));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(registry.unregister(Uuid::new_v4()).is_none());
        assert!(registry.unregister(Uuid::new_v4()).is_none());
        assert!(!registry.unregister_if_current(Uuid::new_v4(), Uuid::new_v4()));
    }

    #[test]
    fn last_connected_wins() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();
        let first_id = first.conn_id();

        assert!(registry.register(user, first).is_none());
        let replaced = registry.register(user, second.clone()).unwrap();
        assert_eq!(replaced.conn_id(), first_id);
        // Replaced handle is not closed by the registry
        assert!(!replaced.is_closed());

        assert_eq!(registry.lookup(user).unwrap().conn_id(), second.conn_id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_close_does_not_evict_replacement() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (old, _rx1) = ConnectionHandle::new();
        let (new, _rx2) = ConnectionHandle::new();
        let old_id = old.conn_id();

        registry.register(user, old);
        registry.register(user, new.clone());

        assert!(!registry.unregister_if_current(user, old_id));
        assert_eq!(registry.lookup(user).unwrap().conn_id(), new.conn_id());

        assert!(registry.unregister_if_current(user, new.conn_id()));
        assert!(registry.lookup(user).is_none());
    }

    #[test]
    fn push_fails_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::new();
        drop(rx);
        let err = handle
            .push(GatewayEvent::Presence {
                online_user_ids: vec![],
            })
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Closed {
                conn_id: handle.conn_id()
            }
        );
    }

    #[test]
    fn concurrent_registrations_are_all_visible() {
        let registry = ConnectionRegistry::new();
        let users: Vec<Uuid> = (0..32).map(|_| Uuid::new_v4()).collect();

        std::thread::scope(|s| {
            for &user in &users {
                let registry = registry.clone();
                s.spawn(move || {
                    let (handle, _rx) = ConnectionHandle::new();
                    registry.register(user, handle);
                });
            }
        });

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), users.len());
        assert!(users.iter().all(|u| snapshot.contains(u)));
    }
}
