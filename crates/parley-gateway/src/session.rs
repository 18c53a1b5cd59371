use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::presence::{PresenceBroadcaster, PresenceReport};
use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound { user_id: Uuid },
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is already bound to {0}")]
    AlreadyBound(Uuid),
    #[error("session is closed")]
    Closed,
}

/// Lifecycle of one client connection: `Unbound -> Bound -> Closed`.
///
/// A reconnect gets a fresh `Session`; a closed one never rebinds.
/// Dropping a session closes it.
pub struct Session {
    handle: ConnectionHandle,
    state: SessionState,
    registry: ConnectionRegistry,
    presence: PresenceBroadcaster,
    close_superseded: bool,
}

impl Session {
    pub fn new(
        registry: ConnectionRegistry,
        presence: PresenceBroadcaster,
        close_superseded: bool,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new();
        (
            Self {
                handle,
                state: SessionState::Unbound,
                registry,
                presence,
                close_superseded,
            },
            rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conn_id(&self) -> Uuid {
        self.handle.conn_id()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self.state {
            SessionState::Bound { user_id } => Some(user_id),
            _ => None,
        }
    }

    /// Bind this connection to `user_id` and announce the new presence set.
    pub fn identify(&mut self, user_id: Uuid) -> Result<PresenceReport, SessionError> {
        match self.state {
            SessionState::Unbound => {}
            SessionState::Bound { user_id } => return Err(SessionError::AlreadyBound(user_id)),
            SessionState::Closed => return Err(SessionError::Closed),
        }

        if let Some(previous) = self.registry.register(user_id, self.handle.clone()) {
            info!(
                "{} reconnected, connection {} supersedes {}",
                user_id,
                self.handle.conn_id(),
                previous.conn_id()
            );
            if self.close_superseded && previous.close().is_err() {
                debug!("Superseded connection {} was already gone", previous.conn_id());
            }
        }

        self.state = SessionState::Bound { user_id };
        info!("{} bound to connection {}", user_id, self.handle.conn_id());
        Ok(self.presence.broadcast_presence())
    }

    /// Tear down the binding. Returns the broadcast report when the session
    /// was bound; closing an unbound or closed session announces nothing.
    pub fn close(&mut self) -> Option<PresenceReport> {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        let SessionState::Bound { user_id } = previous else {
            return None;
        };

        if !self.registry.unregister_if_current(user_id, self.handle.conn_id()) {
            debug!(
                "Connection {} for {} was already superseded",
                self.handle.conn_id(),
                user_id
            );
        }
        info!("{} unbound from connection {}", user_id, self.handle.conn_id());
        Some(self.presence.broadcast_presence())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
