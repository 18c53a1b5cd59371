pub mod blob;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod unread;
pub mod users;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use tracing::error;

use parley_db::ChatStore;

use crate::error::ChatError;

/// Run a store call on the blocking pool and map its failure into the
/// core error taxonomy.
pub(crate) async fn with_store<T, F>(store: &Arc<dyn ChatStore>, f: F) -> Result<T, ChatError>
where
    F: FnOnce(&dyn ChatStore) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::TransientStore(anyhow::anyhow!("store task failed: {}", e))
        })?
        .map_err(|e| {
            error!("Store error: {:#}", e);
            ChatError::TransientStore(e)
        })
}
