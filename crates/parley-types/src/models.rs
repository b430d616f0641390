use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emoji a message can be reacted to with. Anything else is rejected.
pub const ALLOWED_REACTIONS: [&str; 5] = ["👍", "❤️", "😂", "😮", "😢"];

/// Display name assigned when an identity claim carries a blank name.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Body shown in place of a soft-deleted message. The original text stays
/// in storage but is never sent to clients.
pub const DELETED_MESSAGE_PLACEHOLDER: &str = "This message was deleted";

pub fn is_allowed_reaction(emoji: &str) -> bool {
    ALLOWED_REACTIONS.contains(&emoji)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Stable subject id issued by the external identity provider.
    pub subject_id: String,
    pub name: String,
    pub email: String,
    pub image_url: String,
    pub is_online: bool,
    /// Epoch milliseconds.
    pub last_seen: i64,
    pub created_at: i64,
}

impl User {
    /// A user record created from a bare reference (e.g. a webhook that
    /// carried no profile claims) that nobody has signed in as yet.
    pub fn is_placeholder(&self) -> bool {
        self.name == UNKNOWN_NAME && self.email.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub is_group: bool,
    /// Group display name; `None` for direct conversations.
    pub name: Option<String>,
    pub created_at: i64,
    /// Denormalized, bumped on every send.
    pub last_message_at: Option<i64>,
}
