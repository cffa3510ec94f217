use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store not open")]
    NotOpen,

    #[error("no result")]
    NotFound,

    #[error("invalid user: {0}")]
    InvalidUser(&'static str),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("corrupt content encoding: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
