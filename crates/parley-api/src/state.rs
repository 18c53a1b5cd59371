use std::sync::Arc;

use parley_db::ChatStore;
use parley_gateway::Gateway;

use crate::blob::LocalBlobStore;
use crate::dispatch::MessageDispatcher;
use crate::unread::UnreadCounter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn ChatStore>,
    pub gateway: Gateway,
    pub dispatcher: MessageDispatcher,
    pub unread: UnreadCounter,
    pub blobs: LocalBlobStore,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(
        store: Arc<dyn ChatStore>,
        gateway: Gateway,
        blobs: LocalBlobStore,
        jwt_secret: String,
    ) -> AppState {
        let dispatcher = MessageDispatcher::new(store.clone(), gateway.registry().clone());
        let unread = dispatcher.counter().clone();
        Arc::new(Self {
            store,
            gateway,
            dispatcher,
            unread,
            blobs,
            jwt_secret,
        })
    }
}
