//! Database row types, mapping directly to SQLite rows. Kept distinct
//! from the parley-types wire models so the storage layer stays
//! independent; `into_model` converts at the boundary.

use parley_types::models::{Conversation, User};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub subject_id: String,
    pub name: String,
    pub email: String,
    pub image_url: String,
    pub is_online: bool,
    pub last_seen: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub created_at: i64,
    pub last_message_at: Option<i64>,
    pub direct_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemberRow {
    pub conversation_id: String,
    pub user_id: String,
    pub last_read_at: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: i64,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// All ids are written as UUID text by this crate, so parsing back is
/// expected to succeed; a corrupt row is logged and mapped to the nil
/// UUID rather than failing the whole read.
pub fn parse_uuid(value: &str, what: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, value, e);
        Uuid::default()
    })
}

impl UserRow {
    pub fn into_model(self) -> User {
        User {
            id: parse_uuid(&self.id, "user id"),
            subject_id: self.subject_id,
            name: self.name,
            email: self.email,
            image_url: self.image_url,
            is_online: self.is_online,
            last_seen: self.last_seen,
            created_at: self.created_at,
        }
    }
}

impl ConversationRow {
    pub fn into_model(self) -> Conversation {
        Conversation {
            id: parse_uuid(&self.id, "conversation id"),
            is_group: self.is_group,
            name: self.name,
            created_at: self.created_at,
            last_message_at: self.last_message_at,
        }
    }
}
