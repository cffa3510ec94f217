use axum::{
    Json,
    extract::{Query, State, rejection::{JsonRejection, QueryRejection}},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, info};

use talkie_types::api::{CONTENT_TYPE_BINARY, Envelope, MessagesQuery};
use talkie_types::models::Message;

use crate::{ApiError, AppState, run_blocking};

/// POST /send: JSON only. Responds with the assigned message id.
pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<Message>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut msg) = payload?;
    let from = msg.from.fingerprint.clone();
    let to = msg.to.fingerprint.clone();

    let id = run_blocking(move || Ok(state.store.add_message(&mut msg)?)).await?;

    info!("Message {} queued from {} to {}", id, from, to);
    Ok((StatusCode::CREATED, Json(Envelope::ok(id))))
}

/// GET /messages?key=<fingerprint>[&encrypt=1]
///
/// With `encrypt=1` the whole JSON envelope is encrypted for the requesting
/// fingerprint and sent as `application/octet-stream`, so only the key's
/// owner can read the listing. If encryption fails the caller gets an error
/// envelope as JSON instead.
pub async fn get_messages(
    State(state): State<AppState>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let encrypt = query.wants_encryption();
    let key = query.key.trim().to_string();
    if key.is_empty() {
        return Err(ApiError::BadRequest("missing key".into()));
    }

    let db = state.clone();
    let owner = key.clone();
    let messages = run_blocking(move || {
        db.store
            .find_user_by_fingerprint(&owner)
            .map_err(|e| ApiError::not_found_or(e, format!("user {}", owner)))?;
        Ok(db.store.get_user_messages(&owner)?)
    })
    .await?;

    debug!("{} message(s) for {}", messages.len(), key);
    let envelope = Envelope::ok(messages);
    if !encrypt {
        return Ok(Json(envelope).into_response());
    }

    let identity = state
        .server_identity
        .clone()
        .ok_or_else(|| ApiError::Internal("relay has no identity for encrypted listings".into()))?;
    let body = serde_json::to_vec(&envelope).map_err(|e| ApiError::Internal(e.to_string()))?;

    let gateway = state.gateway.clone();
    let sealed = run_blocking(move || Ok(gateway.encrypt(&identity, &key, &mut body.as_slice())?)).await?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE_BINARY)], sealed).into_response())
}
