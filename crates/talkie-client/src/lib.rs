//! Client SDK for the talkie relay.
//!
//! The decode path for every response is chosen from its `Content-Type`
//! header alone. Retrying a failed `send` is left to the caller.

pub mod error;

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use talkie_crypto::CryptoGateway;
use talkie_types::api::{CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON, Envelope};
use talkie_types::models::{Message, User};

pub use error::ClientError;

pub type Result<T> = std::result::Result<T, ClientError>;

pub const DEFAULT_SERVER: &str = "127.0.0.1:3333";

pub struct Client {
    base_url: String,
    http: reqwest::Client,
    gateway: Arc<dyn CryptoGateway>,
}

impl Client {
    /// `server` is `host:port` or a full `http(s)://` base URL. Empty means
    /// [`DEFAULT_SERVER`]. The gateway decrypts encrypted listings.
    pub fn new(server: &str, gateway: Arc<dyn CryptoGateway>) -> Self {
        let server = server.trim().trim_end_matches('/');
        let server = if server.is_empty() { DEFAULT_SERVER } else { server };
        let base_url = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{}", server)
        };

        Self {
            base_url,
            http: reqwest::Client::new(),
            gateway,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn url_with(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        Url::parse_with_params(&self.url(path), params).map_err(|e| ClientError::InvalidRequest(e.to_string()))
    }

    /// Register `user`; on success its `user_id` is filled in.
    pub async fn register(&self, user: &mut User) -> Result<()> {
        if user.fingerprint.is_empty() {
            return Err(ClientError::InvalidRequest("user has no key".into()));
        }

        let res = self.post_json("register", &*user).await?;
        let env: Envelope<User> = decode_json(res).await?;
        if let Some(stored) = env.into_result().map_err(ClientError::Server)? {
            user.user_id = stored.user_id;
        }
        Ok(())
    }

    /// Submit `msg`; on success its `message_id` is filled in.
    pub async fn send(&self, msg: &mut Message) -> Result<()> {
        let res = self.post_json("send", &*msg).await?;
        let env: Envelope<i64> = decode_json(res).await?;
        if let Some(id) = env.into_result().map_err(ClientError::Server)? {
            msg.message_id = id;
        }
        debug!("Sent message {} to {}", msg.message_id, msg.to.fingerprint);
        Ok(())
    }

    /// Fetch the inbox of `user`. With `encrypted` the relay seals the
    /// listing for the user's key and it is decrypted here.
    pub async fn get_messages(&self, user: &User, encrypted: bool) -> Result<Vec<Message>> {
        if user.fingerprint.is_empty() {
            return Err(ClientError::InvalidRequest("user has no key".into()));
        }

        let mut params = vec![("key", user.fingerprint.as_str())];
        if encrypted {
            params.push(("encrypt", "1"));
        }
        let res = self.http.get(self.url_with("messages", &params)?).send().await?;

        let env: Envelope<Vec<Message>> = match content_type(&res).as_str() {
            CONTENT_TYPE_BINARY => {
                let sealed = res.bytes().await?;
                let gateway = self.gateway.clone();
                let identity = user.fingerprint.clone();
                let plain = tokio::task::spawn_blocking(move || gateway.decrypt(&identity, &mut &sealed[..]))
                    .await??;
                serde_json::from_slice(&plain)?
            }
            CONTENT_TYPE_JSON => serde_json::from_slice(&res.bytes().await?)?,
            other => return Err(ClientError::UnexpectedContentType(other.to_string())),
        };

        Ok(env.into_result().map_err(ClientError::Server)?.unwrap_or_default())
    }

    /// Raw stored content of a message. Not decrypted.
    pub async fn download_message(&self, message_id: i64) -> Result<Vec<u8>> {
        let id = message_id.to_string();
        let res = self
            .http
            .get(self.url_with("m", &[("id", id.as_str())])?)
            .send()
            .await?;

        match content_type(&res).as_str() {
            CONTENT_TYPE_BINARY => Ok(res.bytes().await?.to_vec()),
            // an error envelope is more useful than a bare content-type complaint
            CONTENT_TYPE_JSON => {
                let env: Envelope<serde_json::Value> = serde_json::from_slice(&res.bytes().await?)?;
                match env.into_result() {
                    Err(e) => Err(ClientError::Server(e)),
                    Ok(_) => Err(ClientError::UnexpectedContentType(CONTENT_TYPE_JSON.to_string())),
                }
            }
            other => Err(ClientError::UnexpectedContentType(other.to_string())),
        }
    }

    async fn post_json<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let res = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;
        Ok(res)
    }
}

/// Media type without parameters, lowercased.
fn content_type(res: &Response) -> String {
    res.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

async fn decode_json<T: DeserializeOwned>(res: Response) -> Result<Envelope<T>> {
    let ct = content_type(&res);
    if ct != CONTENT_TYPE_JSON {
        return Err(ClientError::UnexpectedContentType(ct));
    }
    Ok(serde_json::from_slice(&res.bytes().await?)?)
}
