use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use parley_types::models::is_allowed_reaction;

use crate::conversations::require_membership;
use crate::messages::message_by_id;
use crate::{Database, Result, StoreError};

impl Database {
    /// Toggle a reaction: removes if present, inserts if absent, with at
    /// most one row per (message, user, emoji). Returns the conversation
    /// id and whether the toggle removed the reaction.
    pub fn toggle_reaction(&self, me: &str, message_id: &str, emoji: &str) -> Result<(String, bool)> {
        if !is_allowed_reaction(emoji) {
            return Err(StoreError::InvalidInput(format!("emoji not allowed: {emoji}")));
        }

        self.with_conn_mut(|conn| {
            let message = message_by_id(conn, message_id)?.ok_or(StoreError::NotFound)?;
            require_membership(conn, &message.conversation_id, me)?;

            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM message_reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id, me, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                conn.execute("DELETE FROM message_reactions WHERE id = ?1", [id])?;
                return Ok((message.conversation_id, true));
            }

            conn.execute(
                "INSERT INTO message_reactions (id, message_id, user_id, emoji)
                 VALUES (?1, ?2, ?3, ?4)",
                params![Uuid::new_v4().to_string(), message_id, me, emoji],
            )?;
            Ok((message.conversation_id, false))
        })
    }
}
