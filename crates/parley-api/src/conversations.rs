use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::models::parse_uuid;
use parley_db::now_ms;
use parley_types::api::{
    Claims, ConversationIdResponse, CreateGroupRequest, RenameGroupRequest, StartDirectRequest,
};
use parley_types::events::ChatEvent;

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::current_user;

/// Find or create the direct conversation with another user. Idempotent:
/// both parties get the same conversation regardless of who starts it.
pub async fn start_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartDirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let other = req.other_user_id.to_string();
    let id = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.start_direct(&me.id, &other, now_ms())?)
    })
    .await?;

    let conversation_id = parse_uuid(&id, "conversation id");
    state
        .dispatcher
        .broadcast(ChatEvent::ConversationUpdate { conversation_id });
    Ok(Json(ConversationIdResponse { conversation_id }))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let member_ids: Vec<String> = req.member_ids.iter().map(Uuid::to_string).collect();
    let id = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.create_group(&me.id, &req.name, &member_ids, now_ms())?)
    })
    .await?;

    let conversation_id = parse_uuid(&id, "conversation id");
    state
        .dispatcher
        .broadcast(ChatEvent::ConversationUpdate { conversation_id });
    Ok(Json(ConversationIdResponse { conversation_id }))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let summaries = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.list_for_user(&me.id)?)
    })
    .await?;
    Ok(Json(summaries))
}

/// One conversation with members and the caller's watermark. Responds with
/// JSON null for both "absent" and "not a member" so existence does not
/// leak.
pub async fn get(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let detail = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.get_conversation(&me.id, &conversation_id.to_string())?)
    })
    .await?;
    Ok(Json(detail))
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        let me = current_user(&db, &claims)?;
        db.mark_as_read(&me.id, &conversation_id.to_string(), now_ms())?;
        Ok(())
    })
    .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn rename_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RenameGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        let me = current_user(&db, &claims)?;
        db.rename_group(&me.id, &conversation_id.to_string(), &req.name)?;
        Ok(())
    })
    .await?;

    state
        .dispatcher
        .broadcast(ChatEvent::ConversationUpdate { conversation_id });
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let deleted = blocking(move || {
        let me = current_user(&db, &claims)?;
        Ok(db.leave_group(&me.id, &conversation_id.to_string())?)
    })
    .await?;

    let event = if deleted {
        ChatEvent::ConversationDelete { conversation_id }
    } else {
        ChatEvent::ConversationUpdate { conversation_id }
    };
    state.dispatcher.broadcast(event);
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        let me = current_user(&db, &claims)?;
        db.delete_group(&me.id, &conversation_id.to_string())?;
        Ok(())
    })
    .await?;

    state
        .dispatcher
        .broadcast(ChatEvent::ConversationDelete { conversation_id });
    Ok(Json(serde_json::json!({ "ok": true })))
}
