use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as shown to other users. Credentials never leave the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub profile_pic: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A direct message between two users.
///
/// At least one of `text` / `image_url` is set and `sender_id != receiver_id`.
/// The only mutation after creation is `read: false -> true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a fresh unread message stamped with the current time, truncated
    /// to the microsecond precision the store keeps.
    pub fn new(
        sender_id: Uuid,
        receiver_id: Uuid,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            text,
            image_url,
            read: false,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}
