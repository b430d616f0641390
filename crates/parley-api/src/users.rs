use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use parley_db::models::UserRow;
use parley_db::{Database, IdentityClaim, now_ms};
use parley_types::api::{Claims, UpdateProfileRequest};
use parley_types::events::ChatEvent;
use parley_types::models::User;

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;

/// Resolve the caller's local user record. A valid token whose subject has
/// never been provisioned reads as unauthenticated.
pub(crate) fn current_user(db: &Database, claims: &Claims) -> Result<UserRow, ApiError> {
    db.get_by_subject(&claims.sub)?.ok_or(ApiError::Unauthenticated)
}

/// Identity claims carried by the session token, with blanks for anything
/// the provider did not assert.
pub(crate) fn identity_claim(claims: &Claims) -> IdentityClaim {
    IdentityClaim {
        subject_id: claims.sub.clone(),
        name: claims.name.clone().unwrap_or_default(),
        email: claims.email.clone().unwrap_or_default(),
        image_url: claims.picture.clone().unwrap_or_default(),
    }
}

/// On-demand identity sync: provision or refresh the caller's user record
/// from their token claims and mark them online.
pub async fn sync(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let claim = identity_claim(&claims);
    let (user, was_online) = blocking(move || Ok(db.ensure_from_identity(&claim, now_ms())?)).await?;

    let user = user.into_model();
    if !was_online {
        state.dispatcher.broadcast(ChatEvent::PresenceUpdate {
            user_id: user.id,
            online: true,
            last_seen: user.last_seen,
        });
    }
    Ok(Json(user))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = blocking(move || current_user(&db, &claims)).await?;
    Ok(Json(user.into_model()))
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
}

/// Discover other users, optionally filtered by name substring.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let users: Vec<User> = blocking(move || {
        let me = current_user(&db, &claims)?;
        let rows = db.list_others(&me.id, query.search.as_deref())?;
        Ok(rows.into_iter().map(UserRow::into_model).collect())
    })
    .await?;
    Ok(Json(users))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        let me = current_user(&db, &claims)?;
        db.update_profile(&me.id, &req.name, req.image_url.as_deref())?;
        Ok(())
    })
    .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
