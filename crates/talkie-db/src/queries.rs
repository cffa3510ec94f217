use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use talkie_types::models::{Message, User};

use crate::models::{MessageRow, UserRow};
use crate::{Result, Store, StoreError};

/// Largest payload `add_message` accepts, before base64 expansion.
pub const MAX_CONTENT_BYTES: usize = 8 * 1024 * 1024;

impl Store {
    // -- Users --

    /// Upsert by (email, fingerprint). Re-registering the same pair keeps
    /// the existing `user_id` and refreshes the display name.
    pub fn add_user(&self, user: &mut User) -> Result<i64> {
        if user.fingerprint.trim().is_empty() {
            return Err(StoreError::InvalidUser("empty fingerprint"));
        }

        let id = self.with_conn(|conn| {
            let id = conn.query_row(
                "INSERT INTO users (\"key\", name, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email, \"key\") DO UPDATE SET name = excluded.name
                 RETURNING id",
                (&user.fingerprint, &user.name, &user.email),
                |row| row.get(0),
            )?;
            Ok(id)
        })?;

        debug!("Stored user {} ({})", id, user.fingerprint);
        user.user_id = id;
        Ok(id)
    }

    pub fn find_user(&self, user_id: i64) -> Result<User> {
        self.with_conn(|conn| query_user_by_id(conn, user_id))?
            .map(into_user)
            .ok_or(StoreError::NotFound)
    }

    pub fn find_user_by_fingerprint(&self, fingerprint: &str) -> Result<User> {
        self.with_conn(|conn| query_user_by_key(conn, fingerprint))?
            .map(into_user)
            .ok_or(StoreError::NotFound)
    }

    /// Names are not unique. No match is an empty vec, never `NotFound`.
    pub fn find_users_by_name(&self, name: &str) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, \"key\", name, email FROM users WHERE name = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([name], read_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(into_user).collect())
        })
    }

    /// Administrative removal. Messages addressed to or from the user are
    /// left in place and will fail to resolve on read.
    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
            Ok(())
        })
    }

    // -- Messages --

    /// Persist a message and assign its id and `created_at`. Both
    /// fingerprints must already be registered.
    pub fn add_message(&self, msg: &mut Message) -> Result<i64> {
        if msg.from.fingerprint.is_empty() || msg.to.fingerprint.is_empty() {
            return Err(StoreError::InvalidMessage("missing sender or recipient".into()));
        }
        if msg.content.len() > MAX_CONTENT_BYTES {
            return Err(StoreError::InvalidMessage(format!(
                "content is {} bytes, limit is {}",
                msg.content.len(),
                MAX_CONTENT_BYTES
            )));
        }

        let content = B64.encode(&msg.content);
        // Stored at second granularity; keep the in-memory value in step.
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let duration = i64::try_from(msg.duration.as_secs()).unwrap_or(i64::MAX);

        let id = self.with_conn(|conn| {
            for key in [&msg.from.fingerprint, &msg.to.fingerprint] {
                if query_user_by_key(conn, key)?.is_none() {
                    return Err(StoreError::InvalidMessage(format!("unknown user {}", key)));
                }
            }

            conn.execute(
                "INSERT INTO messages (\"from\", \"to\", duration, content, created_at, played)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    &msg.from.fingerprint,
                    &msg.to.fingerprint,
                    duration,
                    content,
                    &created_at,
                    msg.played
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!("Stored message {} from {} to {}", id, msg.from.fingerprint, msg.to.fingerprint);
        msg.message_id = id;
        msg.created_at = parse_created_at(id, &created_at);
        Ok(id)
    }

    /// Fails with `NotFound` if the message or either of its users is gone.
    pub fn get_message(&self, message_id: i64) -> Result<Message> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, \"from\", \"to\", duration, content, created_at, played
                     FROM messages WHERE id = ?1",
                    [message_id],
                    read_message_row,
                )
                .optional()?
                .ok_or(StoreError::NotFound)?;

            resolve_message(conn, row)
        })
    }

    /// Inbox for `fingerprint` in insertion order.
    pub fn get_user_messages(&self, fingerprint: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, \"from\", \"to\", duration, content, created_at, played
                 FROM messages WHERE \"to\" = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([fingerprint], read_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(|row| resolve_message(conn, row)).collect()
        })
    }

    /// Both directions are permitted. An unknown id is a no-op.
    pub fn update_message_played(&self, message_id: i64, played: bool) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET played = ?1 WHERE id = ?2",
                rusqlite::params![played, message_id],
            )?;
            if changed == 0 {
                debug!("update_message_played: no message {}", message_id);
            }
            Ok(())
        })
    }

    pub fn delete_message(&self, message_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(())
        })
    }
}

fn read_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        key: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
    })
}

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        duration: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        played: row.get(6)?,
    })
}

fn into_user(row: UserRow) -> User {
    User {
        user_id: row.id,
        name: row.name,
        email: row.email,
        fingerprint: row.key,
    }
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, \"key\", name, email FROM users WHERE id = ?1",
        [id],
        read_user_row,
    )
    .optional()
}

/// The same fingerprint may be registered under several emails; the most
/// recent registration wins.
fn query_user_by_key(conn: &Connection, key: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, \"key\", name, email FROM users WHERE \"key\" = ?1 ORDER BY id DESC LIMIT 1",
        [key],
        read_user_row,
    )
    .optional()
}

fn resolve_message(conn: &Connection, row: MessageRow) -> Result<Message> {
    let from = query_user_by_key(conn, &row.from)?.ok_or_else(|| {
        warn!("Message {} has dangling sender {}", row.id, row.from);
        StoreError::NotFound
    })?;
    let to = query_user_by_key(conn, &row.to)?.ok_or_else(|| {
        warn!("Message {} has dangling recipient {}", row.id, row.to);
        StoreError::NotFound
    })?;

    Ok(Message {
        message_id: row.id,
        from: into_user(from),
        to: into_user(to),
        content: B64.decode(row.content.as_bytes())?,
        created_at: parse_created_at(row.id, &row.created_at),
        duration: Duration::from_secs(u64::try_from(row.duration).unwrap_or(0)),
        played: row.played,
    })
}

/// Unparseable timestamps fall back to the Unix epoch rather than failing
/// the read.
fn parse_created_at(id: i64, raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message {}: {}", raw, id, e);
            DateTime::default()
        })
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
