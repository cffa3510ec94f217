use thiserror::Error;

use talkie_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected content type {0:?}")]
    UnexpectedContentType(String),

    /// The relay answered with `success: false`.
    #[error("server error: {0}")]
    Server(String),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
