use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_db::now_ms;
use parley_types::api::{Claims, SetOnlineRequest};
use parley_types::events::ChatEvent;

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::identity_claim;

/// Periodic client heartbeat: refreshes last-seen, flips the user online,
/// and back-fills blank profile fields from the token claims. Going
/// offline is the sweep's job, or an explicit sign-off.
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let claim = identity_claim(&claims);
    let (user, was_online) = blocking(move || Ok(db.ensure_from_identity(&claim, now_ms())?)).await?;

    if !was_online {
        let user = user.into_model();
        state.dispatcher.broadcast(ChatEvent::PresenceUpdate {
            user_id: user.id,
            online: true,
            last_seen: user.last_seen,
        });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn set_online(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetOnlineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    flip(state, claims, req.is_online).await
}

/// Explicit sign-off, fired on page unload; the sweep would catch the
/// disconnect eventually but this makes it immediate.
pub async fn set_offline(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    flip(state, claims, false).await
}

async fn flip(
    state: AppState,
    claims: Claims,
    is_online: bool,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let updated = blocking(move || Ok(db.set_online(&claims.sub, is_online, now_ms())?)).await?;

    // A missing user record is a silent no-op, mirroring the store.
    if let Some(user) = updated {
        let user = user.into_model();
        state.dispatcher.broadcast(ChatEvent::PresenceUpdate {
            user_id: user.id,
            online: is_online,
            last_seen: user.last_seen,
        });
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}
