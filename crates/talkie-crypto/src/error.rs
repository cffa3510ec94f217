use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("no secret key for {0}")]
    NoSecretKey(String),

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("gpg {command} failed ({status}): {stderr}")]
    Subprocess {
        command: &'static str,
        status: String,
        stderr: String,
    },

    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
