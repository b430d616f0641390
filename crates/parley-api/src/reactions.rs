use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::models::parse_uuid;
use parley_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use parley_types::events::ChatEvent;

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::current_user;

pub async fn toggle(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let emoji = req.emoji.clone();
    let (conversation_id, user_id, removed) = blocking(move || {
        let me = current_user(&db, &claims)?;
        let (conversation_id, removed) = db.toggle_reaction(&me.id, &message_id.to_string(), &req.emoji)?;
        Ok((conversation_id, me.id, removed))
    })
    .await?;

    state.dispatcher.broadcast(ChatEvent::ReactionUpdate {
        conversation_id: parse_uuid(&conversation_id, "conversation id"),
        message_id,
        user_id: parse_uuid(&user_id, "user id"),
        emoji,
        removed,
    });
    Ok(Json(ToggleReactionResponse { removed }))
}
