pub mod filter;
pub mod migrations;
pub mod models;
pub mod queries;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use parley_types::models::{Message, User};

pub use filter::{GroupKey, MessageFilter, MessageMatch, MessagePatch};

/// Operations the messaging core needs from the persistent store.
///
/// Calls are synchronous and may block; async callers run them on the
/// blocking pool. Every call is atomic on its own, nothing more.
pub trait ChatStore: Send + Sync {
    /// Messages matching `filter`, oldest first.
    fn find_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>>;

    fn insert_message(&self, message: &Message) -> Result<Message>;

    /// Count matching messages per `key`. Groups with no rows are absent.
    fn count_by_group(&self, filter: &MessageFilter, key: GroupKey) -> Result<HashMap<Uuid, u64>>;

    /// Apply `patch` to every matching message. Returns the number of rows
    /// whose value actually changed.
    fn update_many(&self, filter: &MessageFilter, patch: &MessagePatch) -> Result<usize>;

    fn user_exists(&self, id: Uuid) -> Result<bool>;

    /// Every user except `id`.
    fn list_users_except(&self, id: Uuid) -> Result<Vec<User>>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}
