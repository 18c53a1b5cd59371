use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            full_name    TEXT NOT NULL,
            email        TEXT NOT NULL UNIQUE,
            profile_pic  TEXT,
            created_at   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL,
            receiver_id  TEXT NOT NULL,
            text         TEXT,
            image_url    TEXT,
            read         INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL,
            CHECK (text IS NOT NULL OR image_url IS NOT NULL),
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, read, sender_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
