use axum::{
    Form, Json,
    extract::{FromRequest, Request, State},
    http::header,
};
use tracing::info;

use talkie_types::api::{CONTENT_TYPE_JSON, Envelope, RegisterForm};
use talkie_types::models::User;

use crate::{ApiError, AppState, run_blocking};

/// A `User` from either a JSON body or `name`/`email`/`key` form fields.
#[derive(Debug)]
pub struct RegisterPayload(pub User);

impl<S> FromRequest<S> for RegisterPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(CONTENT_TYPE_JSON));

        if is_json {
            let Json(user) = Json::<User>::from_request(req, state).await?;
            Ok(Self(user))
        } else {
            let Form(form) = Form::<RegisterForm>::from_request(req, state).await?;
            Ok(Self(User::new(form.name, form.email, form.key)))
        }
    }
}

/// POST /register: upsert a user, importing its key onto the relay's
/// keyring first if the relay has never seen it.
pub async fn register(
    State(state): State<AppState>,
    RegisterPayload(mut user): RegisterPayload,
) -> Result<Json<Envelope<User>>, ApiError> {
    user.fingerprint = user.fingerprint.trim().to_string();
    if user.fingerprint.is_empty() {
        return Err(ApiError::BadRequest("missing key".into()));
    }
    // the store assigns ids
    user.user_id = 0;

    let user = run_blocking(move || {
        if state.gateway.list_public_keys(&user.fingerprint)?.is_empty() {
            info!("Key {} not on local keyring, fetching", user.fingerprint);
            state.gateway.fetch_remote_key(&user.fingerprint)?;
        }
        state.store.add_user(&mut user)?;
        Ok(user)
    })
    .await?;

    info!("Registered {} <{}> key {} as user {}", user.name, user.email, user.fingerprint, user.user_id);
    Ok(Json(Envelope::ok(user)))
}
