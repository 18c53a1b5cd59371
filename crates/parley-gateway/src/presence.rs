use tracing::debug;

use parley_types::events::GatewayEvent;

use crate::registry::ConnectionRegistry;

/// Outcome of one presence broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceReport {
    pub online: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes the online-user set to every registered connection.
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    registry: ConnectionRegistry,
}

impl PresenceBroadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Snapshot the registry and send the result to each online user.
    /// A failed push is logged and skipped; it never stops the others.
    ///
    /// The snapshot and every push happen under one registry read lock, so
    /// a broadcast can never be overtaken by one that saw a newer set.
    pub fn broadcast_presence(&self) -> PresenceReport {
        self.registry.with_connections(|connections| {
            let mut online_user_ids: Vec<_> = connections.keys().copied().collect();
            online_user_ids.sort_unstable();

            let mut report = PresenceReport {
                online: online_user_ids.len(),
                ..Default::default()
            };

            let event = GatewayEvent::Presence { online_user_ids };

            for (user_id, handle) in connections {
                match handle.push(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        debug!("Presence push to {} failed: {}", user_id, e);
                        report.failed += 1;
                    }
                }
            }

            debug!(
                "Presence broadcast: {} online, {} delivered, {} failed",
                report.online, report.delivered, report.failed
            );
            report
        })
    }
}
