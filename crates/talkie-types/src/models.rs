use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{base64_bytes, duration_secs};

/// A relay identity. The public-key fingerprint (`key` on the wire) is the
/// business key; `id` is the surrogate assigned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "id", default)]
    pub user_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "key")]
    pub fingerprint: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            user_id: 0,
            name: name.into(),
            email: email.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// One relayed payload. `content` is opaque to the relay and travels as
/// base64 inside JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "id", default)]
    pub message_id: i64,
    pub from: User,
    pub to: User,
    #[serde(with = "base64_bytes", default)]
    pub content: Vec<u8>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Sub-second precision survives the wire but not the store.
    #[serde(with = "duration_secs", default)]
    pub duration: Duration,
    #[serde(default)]
    pub played: bool,
}

impl Message {
    pub fn new(from: User, to: User, content: Vec<u8>) -> Self {
        Self {
            message_id: 0,
            from,
            to,
            content,
            created_at: DateTime::<Utc>::default(),
            duration: Duration::ZERO,
            played: false,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}
