use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params_from_iter, types::Value};
use uuid::Uuid;

use parley_types::models::{Message, User};

use crate::filter::{GroupKey, MessageFilter, MessagePatch};
use crate::models::{MessageRow, UserRow};
use crate::{ChatStore, Database};

impl Database {
    // -- Users --

    /// Users are owned by the auth service; this is for seeding and tests.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, full_name, email, profile_pic, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    user.id.to_string(),
                    user.full_name,
                    user.email,
                    user.profile_pic,
                    format_timestamp(&user.created_at),
                ],
            )?;
            Ok(())
        })
    }
}

impl ChatStore for Database {
    fn find_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, filter))
    }

    fn insert_message(&self, message: &Message) -> Result<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image_url, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    message.text,
                    message.image_url,
                    message.read,
                    format_timestamp(&message.created_at),
                ],
            )?;
            Ok(message.clone())
        })
    }

    fn count_by_group(&self, filter: &MessageFilter, key: GroupKey) -> Result<HashMap<Uuid, u64>> {
        self.with_conn(|conn| {
            let (predicate, params) = filter.to_sql();
            let column = key.column();
            let sql = format!(
                "SELECT {column}, COUNT(*) FROM messages WHERE {predicate} GROUP BY {column}"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, count)| {
                    let id = id
                        .parse::<Uuid>()
                        .with_context(|| format!("Corrupt {} '{}'", column, id))?;
                    Ok((id, count as u64))
                })
                .collect()
        })
    }

    fn update_many(&self, filter: &MessageFilter, patch: &MessagePatch) -> Result<usize> {
        let Some(read) = patch.read else {
            return Ok(0);
        };

        self.with_conn(|conn| {
            let (predicate, filter_params) = filter.to_sql();
            // Only touch rows whose value differs so the count reflects real changes
            let sql = format!("UPDATE messages SET read = ? WHERE ({predicate}) AND read <> ?");

            let flag = Value::Integer(read as i64);
            let mut params = Vec::with_capacity(filter_params.len() + 2);
            params.push(flag.clone());
            params.extend(filter_params);
            params.push(flag);

            let changed = conn.execute(&sql, params_from_iter(params))?;
            Ok(changed)
        })
    }

    fn user_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn list_users_except(&self, id: Uuid) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, full_name, email, profile_pic, created_at
                 FROM users WHERE id <> ?1
                 ORDER BY full_name",
            )?;
            let rows = stmt
                .query_map([id.to_string()], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(User::try_from).collect()
        })
    }
}

fn query_messages(conn: &Connection, filter: &MessageFilter) -> Result<Vec<Message>> {
    let (predicate, params) = filter.to_sql();
    // rowid breaks ties between messages stamped in the same microsecond
    let sql = format!(
        "SELECT id, sender_id, receiver_id, text, image_url, read, created_at
         FROM messages
         WHERE {predicate}
         ORDER BY created_at ASC, rowid ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                text: row.get(3)?,
                image_url: row.get(4)?,
                read: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(Message::try_from).collect()
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_id(&row.id, "message id")?,
            sender_id: parse_id(&row.sender_id, "sender_id")?,
            receiver_id: parse_id(&row.receiver_id, "receiver_id")?,
            text: row.text,
            image_url: row.image_url,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id, "user id")?,
            full_name: row.full_name,
            email: row.email,
            profile_pic: row.profile_pic,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt {} '{}'", what, raw))
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no timezone
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Corrupt created_at '{}'", raw))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
