use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Change notifications pushed over the WebSocket gateway.
///
/// Events carry ids and timestamps, never message bodies: the gateway is a
/// cache-invalidation channel and clients re-run the relevant read when one
/// arrives. This keeps conversation content off the shared broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid },

    /// A message was appended to a conversation.
    MessageCreate {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        created_at: i64,
    },

    /// A message was soft-deleted.
    MessageDelete {
        conversation_id: Uuid,
        message_id: Uuid,
    },

    /// A reaction was toggled on or off.
    ReactionUpdate {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        removed: bool,
    },

    /// A member started or stopped typing.
    TypingUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A user came online or went offline.
    PresenceUpdate {
        user_id: Uuid,
        online: bool,
        last_seen: i64,
    },

    /// A conversation was created, renamed, or its membership changed.
    ConversationUpdate { conversation_id: Uuid },

    /// A conversation and everything in it is gone.
    ConversationDelete { conversation_id: Uuid },
}

impl ChatEvent {
    /// Returns the conversation id if this event is scoped to one.
    /// Events that return `None` are global and go to every client.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { conversation_id, .. }
            | Self::MessageDelete { conversation_id, .. }
            | Self::ReactionUpdate { conversation_id, .. }
            | Self::TypingUpdate { conversation_id, .. } => Some(*conversation_id),
            // Ready, PresenceUpdate, and conversation lifecycle events are
            // global: a client cannot subscribe to a conversation it has
            // not yet learned exists.
            _ => None,
        }
    }
}

/// Commands sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Replace the set of conversations this client wants scoped events
    /// for. Global events are delivered regardless.
    Subscribe { conversation_ids: Vec<Uuid> },
}
