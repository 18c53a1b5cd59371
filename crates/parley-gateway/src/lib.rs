//! Real-time side of parley: who is online, and how events reach them.

pub mod connection;
pub mod presence;
pub mod registry;
pub mod session;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionRegistry, Outbound};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Ping cadence; two missed pongs drop the connection.
    pub heartbeat_interval: Duration,
    /// How long a new socket may take to send `identify`.
    pub identify_timeout: Duration,
    /// Close the previous connection when a user reconnects.
    pub close_superseded: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            identify_timeout: Duration::from_secs(10),
            close_superseded: false,
        }
    }
}

/// Process-wide gateway state, built once at startup and cloned into
/// every connection and request handler.
#[derive(Debug, Clone)]
pub struct Gateway {
    registry: ConnectionRegistry,
    presence: PresenceBroadcaster,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(settings: GatewaySettings) -> Self {
        let registry = ConnectionRegistry::new();
        let presence = PresenceBroadcaster::new(registry.clone());
        Self {
            registry,
            presence,
            settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceBroadcaster {
        &self.presence
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Start the lifecycle for a freshly accepted connection.
    pub fn open_session(&self) -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        Session::new(
            self.registry.clone(),
            self.presence.clone(),
            self.settings.close_superseded,
        )
    }
}
