use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use parley_db::{ChatStore, GroupKey, MessageFilter, MessagePatch};

use crate::error::ChatError;
use crate::with_store;

/// Unread totals per (sender, receiver), derived from the `read` flag on
/// stored messages. Nothing is cached; every call asks the store.
#[derive(Clone)]
pub struct UnreadCounter {
    store: Arc<dyn ChatStore>,
}

impl UnreadCounter {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// sender -> unread count for everything addressed to `receiver_id`.
    /// Senders with nothing unread are absent.
    pub async fn count_unread(&self, receiver_id: Uuid) -> Result<HashMap<Uuid, u64>, ChatError> {
        with_store(&self.store, move |store| {
            store.count_by_group(&MessageFilter::unread_for(receiver_id), GroupKey::Sender)
        })
        .await
    }

    pub async fn count_unread_for_pair(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<u64, ChatError> {
        let counts = with_store(&self.store, move |store| {
            store.count_by_group(
                &MessageFilter::unread_between(sender_id, receiver_id),
                GroupKey::Sender,
            )
        })
        .await?;
        Ok(counts.get(&sender_id).copied().unwrap_or(0))
    }

    /// Mark everything `peer_id` sent to `reader_id` as read. Returns how
    /// many messages flipped; a repeat call flips none. The peer is not told.
    pub async fn mark_read(&self, reader_id: Uuid, peer_id: Uuid) -> Result<usize, ChatError> {
        let changed = with_store(&self.store, move |store| {
            if !store.user_exists(peer_id)? {
                return Ok(None);
            }
            store
                .update_many(
                    &MessageFilter::unread_between(peer_id, reader_id),
                    &MessagePatch::mark_read(),
                )
                .map(Some)
        })
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("user {}", peer_id)))?;

        debug!("{} read {} messages from {}", reader_id, changed, peer_id);
        Ok(changed)
    }
}
