use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::models::parse_uuid;
use parley_db::now_ms;
use parley_types::api::{Claims, SetTypingRequest};
use parley_types::events::ChatEvent;
use parley_types::models::User;

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::current_user;

pub async fn set(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetTypingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let is_typing = req.is_typing;
    let user_id = blocking(move || {
        let me = current_user(&db, &claims)?;
        db.set_typing(&me.id, &conversation_id.to_string(), is_typing, now_ms())?;
        Ok(me.id)
    })
    .await?;

    state.dispatcher.broadcast(ChatEvent::TypingUpdate {
        conversation_id,
        user_id: parse_uuid(&user_id, "user id"),
        is_typing,
    });
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn list(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<User>>, ApiError> {
    let db = state.db.clone();
    let typists = blocking(move || {
        let me = current_user(&db, &claims)?;
        let rows = db.active_typists(&me.id, &conversation_id.to_string(), now_ms())?;
        Ok(rows.into_iter().map(|row| row.into_model()).collect())
    })
    .await?;
    Ok(Json(typists))
}
