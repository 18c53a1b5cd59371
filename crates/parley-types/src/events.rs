use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed by the server over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Full set of currently connected users
    Presence { online_user_ids: Vec<Uuid> },

    /// A message addressed to this connection's user
    #[serde(rename = "message")]
    NewMessage { payload: Message },

    /// Fresh unread total for messages from `user_id`
    UnreadCountUpdate { user_id: Uuid, count: u64 },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Bind this connection to a user identity. Must be the first frame.
    Identify { user_id: Uuid },
}
