use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use parley_db::models::parse_uuid;
use parley_db::now_ms;
use parley_types::api::{Claims, MessageIdResponse, SendMessageRequest};
use parley_types::events::ChatEvent;

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::current_user;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn send(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let legacy = state.legacy_direct_keys;
    let created_at = now_ms();
    let (id, sender_id) = blocking(move || {
        let me = current_user(&db, &claims)?;
        let id = db.send_message(&me.id, &conversation_id.to_string(), &req.body, created_at, legacy)?;
        Ok((id, me.id))
    })
    .await?;

    let message_id = parse_uuid(&id, "message id");
    state.dispatcher.broadcast(ChatEvent::MessageCreate {
        conversation_id,
        message_id,
        sender_id: parse_uuid(&sender_id, "user id"),
        created_at,
    });

    Ok((StatusCode::CREATED, Json(MessageIdResponse { message_id })))
}

pub async fn list(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let messages = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.list_messages(&me.id, &conversation_id.to_string(), query.limit)?)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn soft_delete(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let conversation_id = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.soft_delete_message(&me.id, &message_id.to_string())?)
    })
    .await?;

    state.dispatcher.broadcast(ChatEvent::MessageDelete {
        conversation_id: parse_uuid(&conversation_id, "conversation id"),
        message_id,
    });
    Ok(Json(serde_json::json!({ "ok": true })))
}
