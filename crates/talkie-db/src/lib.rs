pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

pub use error::StoreError;
pub use queries::MAX_CONTENT_BYTES;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Identity & message store. Owns a single SQLite connection; writes are
/// serialized behind the mutex and are durable when a call returns.
///
/// `close` drops the connection, after which every call fails with
/// [`StoreError::NotOpen`].
pub struct Store {
    conn: Mutex<Option<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;

        debug!("In-memory store opened");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&self) {
        let Ok(mut guard) = self.conn.lock() else {
            return;
        };
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("Error closing store: {}", e);
            }
            info!("Store closed");
        }
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let conn = guard.as_ref().ok_or(StoreError::NotOpen)?;
        f(conn)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}
