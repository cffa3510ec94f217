use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            \"key\"       TEXT NOT NULL,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_key
            ON users(email, \"key\");

        CREATE INDEX IF NOT EXISTS idx_users_name
            ON users(name);

        -- \"from\"/\"to\" hold fingerprints, not user ids
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            \"from\"      TEXT NOT NULL,
            \"to\"        TEXT NOT NULL,
            duration    INTEGER NOT NULL DEFAULT 0,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            played      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_to
            ON messages(\"to\", id);
        ",
    )?;

    info!("Store migrations complete");
    Ok(())
}
