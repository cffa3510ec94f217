use serde::{Deserialize, Serialize};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// Wrapper around every non-binary protocol response.
///
/// `data` absent means "no payload", not failure. A `success: false`
/// envelope always carries an `error` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "no_data", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn no_data<T>() -> Option<T> {
    None
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into the payload, or the server's error string.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

/// Form fields accepted by `POST /register`.
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub key: String,
}

/// Query for `GET /messages`.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub key: String,
    pub encrypt: Option<String>,
}

impl MessagesQuery {
    pub fn wants_encryption(&self) -> bool {
        matches!(self.encrypt.as_deref(), Some("1" | "true" | "yes"))
    }
}

/// Query for `GET /m`.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub id: i64,
}
