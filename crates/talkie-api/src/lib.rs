pub mod download;
pub mod error;
pub mod messages;
pub mod register;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::error;

use talkie_crypto::CryptoGateway;
use talkie_db::Store;
use talkie_types::api::Envelope;

pub use error::ApiError;

pub const DEFAULT_BODY_LIMIT: usize = body_limit(talkie_db::MAX_CONTENT_BYTES);

/// Request body bound for a given content size: base64 inflates content by
/// 4/3, plus room for the JSON around it.
pub const fn body_limit(max_content: usize) -> usize {
    max_content / 3 * 4 + 64 * 1024
}

pub type AppState = Arc<AppStateInner>;

/// Everything the handlers share. Handlers keep no other state.
pub struct AppStateInner {
    pub store: Store,
    pub gateway: Arc<dyn CryptoGateway>,
    /// Signing identity for encrypted listings. `None` disables `encrypt=1`.
    pub server_identity: Option<String>,
}

impl AppStateInner {
    pub fn new(store: Store, gateway: Arc<dyn CryptoGateway>, server_identity: Option<String>) -> AppState {
        Arc::new(Self {
            store,
            gateway,
            server_identity,
        })
    }
}

pub fn router(state: AppState) -> Router {
    router_with_limit(state, DEFAULT_BODY_LIMIT)
}

pub fn router_with_limit(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/register", post(register::register))
        .route("/send", post(messages::send_message))
        .route("/messages", get(messages::get_messages))
        .route("/m", get(download::download_message))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.is_open() {
        (StatusCode::OK, Json(Envelope::ok("ok")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::failure("store not open")))
    }
}

/// Run store and gateway calls off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal("worker task failed".into())
    })?
}
