use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, User};

// -- JWT Claims --

/// JWT claims shared by parley-api (REST middleware) and parley-gateway
/// (WebSocket authentication). Tokens are issued by the external identity
/// provider; `sub` is its stable subject id. The optional fields are
/// identity claims used to provision or back-fill the local user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartDirectRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ConversationIdResponse {
    pub conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameGroupRequest {
    pub name: String,
}

/// One row of the caller's conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub is_group: bool,
    /// Group name, or empty for direct conversations.
    pub name: String,
    pub member_count: usize,
    /// The peer, for direct conversations only.
    pub other_user: Option<User>,
    pub last_message_text: String,
    pub last_message_at: i64,
    pub unread_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub members: Vec<User>,
    pub other_user: Option<User>,
    /// Caller's read watermark, epoch milliseconds.
    pub last_read_at: i64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct MessageIdResponse {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender: Option<User>,
    /// Placeholder text when `deleted` is set.
    pub body: String,
    pub created_at: i64,
    pub deleted: bool,
    pub reactions: Vec<ReactionSummary>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleReactionResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_me: bool,
}

// -- Typing --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetTypingRequest {
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

// -- Presence / profile --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetOnlineRequest {
    pub is_online: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}
