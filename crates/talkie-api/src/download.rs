use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::header,
    response::IntoResponse,
};

use talkie_types::api::{CONTENT_TYPE_BINARY, DownloadQuery};

use crate::{ApiError, AppState, run_blocking};

/// GET /m?id=<message_id>: the stored content bytes, untouched. Any
/// decryption is up to the client.
pub async fn download_message(
    State(state): State<AppState>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(DownloadQuery { id }) = query?;

    let msg = run_blocking(move || {
        state
            .store
            .get_message(id)
            .map_err(|e| ApiError::not_found_or(e, format!("message {}", id)))
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE_BINARY)], msg.content))
}
