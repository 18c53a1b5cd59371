use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};
use uuid::Uuid;

use parley_db::ChatStore;
use parley_gateway::registry::{ConnectionHandle, ConnectionRegistry, DeliveryError};
use parley_types::events::GatewayEvent;
use parley_types::models::Message;

use crate::error::ChatError;
use crate::unread::UnreadCounter;
use crate::with_store;

/// Content of a message before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl MessageDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_url: None,
        }
    }
}

/// What happened to the live push for a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Message and count were queued on the receiver's connection.
    Delivered,
    /// No connection registered; the receiver hydrates later.
    ReceiverOffline,
    /// A connection was registered but had already gone away.
    Failed(DeliveryError),
    /// The fresh count could not be read, so nothing was pushed.
    Deferred,
}

/// Reject self-sends and empty bodies. Blank text counts as absent.
pub fn validate_draft(
    sender_id: Uuid,
    receiver_id: Uuid,
    draft: MessageDraft,
) -> Result<MessageDraft, ChatError> {
    if sender_id == receiver_id {
        return Err(ChatError::Validation("cannot send a message to yourself".into()));
    }

    let text = draft.text.filter(|t| !t.trim().is_empty());
    let image_url = draft.image_url.filter(|u| !u.trim().is_empty());
    if text.is_none() && image_url.is_none() {
        return Err(ChatError::Validation("message needs text or an image".into()));
    }

    Ok(MessageDraft { text, image_url })
}

/// Persists messages and pushes them, with the updated unread count, to
/// the receiver's live connection.
#[derive(Clone)]
pub struct MessageDispatcher {
    store: Arc<dyn ChatStore>,
    counter: UnreadCounter,
    registry: ConnectionRegistry,
    pair_locks: PairLocks,
}

impl MessageDispatcher {
    pub fn new(store: Arc<dyn ChatStore>, registry: ConnectionRegistry) -> Self {
        Self {
            counter: UnreadCounter::new(store.clone()),
            store,
            registry,
            pair_locks: PairLocks::default(),
        }
    }

    /// Store and deliver a message. Succeeds whenever the store write
    /// succeeds, whether or not the receiver is online.
    pub async fn send(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        draft: MessageDraft,
    ) -> Result<Message, ChatError> {
        let (message, _delivery) = self.send_with_delivery(sender_id, receiver_id, draft).await?;
        Ok(message)
    }

    /// Like [`send`](Self::send) but also reports the push outcome.
    pub async fn send_with_delivery(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        draft: MessageDraft,
    ) -> Result<(Message, Delivery), ChatError> {
        let draft = validate_draft(sender_id, receiver_id, draft)?;

        // One send at a time per direction, so counts follow persistence order
        let _pair = self.pair_locks.lock(sender_id, receiver_id).await;

        let message = Message::new(sender_id, receiver_id, draft.text, draft.image_url);
        let stored = with_store(&self.store, move |store| {
            if let Some(missing) = first_missing(store, sender_id, receiver_id)? {
                return Ok(Err(missing));
            }
            store.insert_message(&message).map(Ok)
        })
        .await?
        .map_err(|missing| ChatError::NotFound(format!("user {}", missing)))?;

        debug!("{} -> {}: stored message {}", sender_id, receiver_id, stored.id);

        let count = match self.counter.count_unread_for_pair(sender_id, receiver_id).await {
            Ok(count) => count,
            Err(e) => {
                error!(
                    "Unread count for {} -> {} unavailable, skipping push: {}",
                    sender_id, receiver_id, e
                );
                return Ok((stored, Delivery::Deferred));
            }
        };

        let delivery = match self.registry.lookup(receiver_id) {
            None => Delivery::ReceiverOffline,
            Some(handle) => match push_message(&handle, &stored, count) {
                Ok(()) => Delivery::Delivered,
                Err(e) => {
                    info!("Live delivery to {} failed: {}", receiver_id, e);
                    Delivery::Failed(e)
                }
            },
        };

        Ok((stored, delivery))
    }

    /// NotFound unless both ends of a send are known users. Lets callers
    /// bail out before doing work a failed send would throw away.
    pub async fn check_participants(&self, sender_id: Uuid, receiver_id: Uuid) -> Result<(), ChatError> {
        with_store(&self.store, move |store| first_missing(store, sender_id, receiver_id))
            .await?
            .map_or(Ok(()), |missing| Err(ChatError::NotFound(format!("user {}", missing))))
    }

    /// Both directions between `user_a` and `user_b`, oldest first.
    pub async fn list_messages(&self, user_a: Uuid, user_b: Uuid) -> Result<Vec<Message>, ChatError> {
        with_store(&self.store, move |store| {
            store.find_messages(&parley_db::MessageFilter::conversation(user_a, user_b))
        })
        .await
    }

    pub fn counter(&self) -> &UnreadCounter {
        &self.counter
    }
}

fn first_missing(store: &dyn ChatStore, sender_id: Uuid, receiver_id: Uuid) -> anyhow::Result<Option<Uuid>> {
    for id in [receiver_id, sender_id] {
        if !store.user_exists(id)? {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// The message goes first so a client never sees a count for a message
/// it has not received.
fn push_message(handle: &ConnectionHandle, message: &Message, count: u64) -> Result<(), DeliveryError> {
    handle.push(GatewayEvent::NewMessage {
        payload: message.clone(),
    })?;
    handle.push(GatewayEvent::UnreadCountUpdate {
        user_id: message.sender_id,
        count,
    })
}

/// Per-direction async locks, dropped again once nobody holds or waits on them.
#[derive(Clone, Default)]
struct PairLocks {
    inner: Arc<Mutex<HashMap<(Uuid, Uuid), Arc<tokio::sync::Mutex<()>>>>>,
}

impl PairLocks {
    async fn lock(&self, sender_id: Uuid, receiver_id: Uuid) -> PairGuard {
        let key = (sender_id, receiver_id);
        let lock = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone();

        PairGuard {
            guard: Some(lock.lock_owned().await),
            key,
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct PairGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: (Uuid, Uuid),
    locks: PairLocks,
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: no holder, no waiter
        if map.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{as_store, seeded_store};
    use parley_gateway::registry::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(item) = rx.try_recv() {
            match item {
                Outbound::Event(event) => events.push(event),
                Outbound::Close => panic!("unexpected close"),
            }
        }
        events
    }

    fn online(registry: &ConnectionRegistry, user: Uuid) -> UnboundedReceiver<Outbound> {
        let (handle, rx) = ConnectionHandle::new();
        registry.register(user, handle);
        rx
    }

    #[tokio::test]
    async fn send_increments_pair_count_by_one() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());

        let before = dispatcher.counter().count_unread_for_pair(a, b).await.unwrap();
        dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();
        let after = dispatcher.counter().count_unread_for_pair(a, b).await.unwrap();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn online_receiver_gets_message_then_count() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let registry = ConnectionRegistry::new();
        let mut rx = online(&registry, b);
        let dispatcher = MessageDispatcher::new(as_store(&db), registry);

        let (msg, delivery) = dispatcher
            .send_with_delivery(a, b, MessageDraft::text("hello"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Delivered);
        assert!(!msg.read);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                GatewayEvent::NewMessage { payload: msg },
                GatewayEvent::UnreadCountUpdate { user_id: a, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn offline_receiver_hydrates_later() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());

        let (_, delivery) = dispatcher
            .send_with_delivery(a, b, MessageDraft::text("are you there?"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::ReceiverOffline);

        let counts = dispatcher.counter().count_unread(b).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&a], 1);
    }

    #[tokio::test]
    async fn stale_connection_is_a_failed_delivery_not_an_error() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let registry = ConnectionRegistry::new();
        let (handle, rx) = ConnectionHandle::new();
        let conn_id = handle.conn_id();
        registry.register(b, handle);
        drop(rx);

        let dispatcher = MessageDispatcher::new(as_store(&db), registry);
        let (msg, delivery) = dispatcher
            .send_with_delivery(a, b, MessageDraft::text("lost push"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Failed(DeliveryError::Closed { conn_id }));

        // Still persisted
        let stored = dispatcher.list_messages(a, b).await.unwrap();
        assert_eq!(stored, vec![msg]);
    }

    #[tokio::test]
    async fn rapid_sends_push_counts_in_order() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let registry = ConnectionRegistry::new();
        let mut rx = online(&registry, b);
        let dispatcher = MessageDispatcher::new(as_store(&db), registry);

        let first = dispatcher.send(a, b, MessageDraft::text("one")).await.unwrap();
        let second = dispatcher.send(a, b, MessageDraft::text("two")).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                GatewayEvent::NewMessage { payload: first },
                GatewayEvent::UnreadCountUpdate { user_id: a, count: 1 },
                GatewayEvent::NewMessage { payload: second },
                GatewayEvent::UnreadCountUpdate { user_id: a, count: 2 },
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_keep_counts_monotonic() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let registry = ConnectionRegistry::new();
        let mut rx = online(&registry, b);
        let dispatcher = MessageDispatcher::new(as_store(&db), registry);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .send(a, b, MessageDraft::text(format!("msg {}", i)))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 40);
        for (i, pair) in events.chunks(2).enumerate() {
            assert!(matches!(pair[0], GatewayEvent::NewMessage { .. }));
            assert_eq!(
                pair[1],
                GatewayEvent::UnreadCountUpdate {
                    user_id: a,
                    count: i as u64 + 1
                }
            );
        }
        assert_eq!(dispatcher.pair_locks.len(), 0);
    }

    #[tokio::test]
    async fn read_resets_and_next_send_counts_from_one() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let registry = ConnectionRegistry::new();
        let mut rx = online(&registry, b);
        let dispatcher = MessageDispatcher::new(as_store(&db), registry);

        dispatcher.send(a, b, MessageDraft::text("1")).await.unwrap();
        dispatcher.send(a, b, MessageDraft::text("2")).await.unwrap();
        dispatcher.counter().mark_read(b, a).await.unwrap();
        drain(&mut rx);

        dispatcher.send(a, b, MessageDraft::text("3")).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(events[1], GatewayEvent::UnreadCountUpdate { user_id: a, count: 1 });
    }

    #[tokio::test]
    async fn validation_rejects_bad_sends() {
        let (db, ids) = seeded_store(2);
        let (a, b) = (ids[0], ids[1]);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());

        let self_send = dispatcher.send(a, a, MessageDraft::text("me")).await;
        assert!(matches!(self_send, Err(ChatError::Validation(_))));

        let empty = dispatcher.send(a, b, MessageDraft::default()).await;
        assert!(matches!(empty, Err(ChatError::Validation(_))));

        let blank = dispatcher.send(a, b, MessageDraft::text("   ")).await;
        assert!(matches!(blank, Err(ChatError::Validation(_))));

        assert!(dispatcher.list_messages(a, b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_only_message_is_accepted() {
        let (db, ids) = seeded_store(2);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());
        let draft = MessageDraft {
            text: None,
            image_url: Some("http://localhost:5000/uploads/cat.png".into()),
        };
        let msg = dispatcher.send(ids[0], ids[1], draft).await.unwrap();
        assert!(msg.text.is_none());
        assert_eq!(msg.image_url.as_deref(), Some("http://localhost:5000/uploads/cat.png"));
    }

    #[tokio::test]
    async fn unknown_receiver_is_not_found() {
        let (db, ids) = seeded_store(1);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());
        let err = dispatcher
            .send(ids[0], Uuid::new_v4(), MessageDraft::text("hello?"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_sender_is_not_found() {
        let (db, ids) = seeded_store(1);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());
        let ghost = Uuid::new_v4();

        let err = dispatcher
            .send(ghost, ids[0], MessageDraft::text("who am i"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert!(dispatcher.list_messages(ghost, ids[0]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn participants_are_checked_both_ways() {
        let (db, ids) = seeded_store(2);
        let dispatcher = MessageDispatcher::new(as_store(&db), ConnectionRegistry::new());

        dispatcher.check_participants(ids[0], ids[1]).await.unwrap();
        for (from, to) in [(ids[0], Uuid::new_v4()), (Uuid::new_v4(), ids[1])] {
            let err = dispatcher.check_participants(from, to).await.unwrap_err();
            assert!(matches!(err, ChatError::NotFound(_)));
        }
    }

    struct DownStore;

    impl ChatStore for DownStore {
        fn find_messages(&self, _: &parley_db::MessageFilter) -> anyhow::Result<Vec<Message>> {
            anyhow::bail!("connection refused")
        }
        fn insert_message(&self, _: &Message) -> anyhow::Result<Message> {
            anyhow::bail!("connection refused")
        }
        fn count_by_group(
            &self,
            _: &parley_db::MessageFilter,
            _: parley_db::GroupKey,
        ) -> anyhow::Result<HashMap<Uuid, u64>> {
            anyhow::bail!("connection refused")
        }
        fn update_many(
            &self,
            _: &parley_db::MessageFilter,
            _: &parley_db::MessagePatch,
        ) -> anyhow::Result<usize> {
            anyhow::bail!("connection refused")
        }
        fn user_exists(&self, _: Uuid) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn list_users_except(&self, _: Uuid) -> anyhow::Result<Vec<parley_types::models::User>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn store_outage_propagates() {
        let dispatcher = MessageDispatcher::new(Arc::new(DownStore), ConnectionRegistry::new());
        let err = dispatcher
            .send(Uuid::new_v4(), Uuid::new_v4(), MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::TransientStore(_)));
    }
}
