use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use parley_types::api::{MessageResponse, ReactionSummary};
use parley_types::models::{ALLOWED_REACTIONS, DELETED_MESSAGE_PLACEHOLDER};

use crate::conversations::{conversation_by_id, insert_membership, membership, require_membership};
use crate::models::{MessageRow, ReactionRow, UserRow, parse_uuid};
use crate::users::user_by_id;
use crate::{Database, Result, StoreError};

impl Database {
    /// Append a message. Membership is required; when `allow_legacy_direct_keys`
    /// is set, a conversation created by the old composite-key scheme lazily
    /// provisions memberships for both named parties before the re-check.
    pub fn send_message(
        &self,
        me: &str,
        conversation_id: &str,
        body: &str,
        now: i64,
        allow_legacy_direct_keys: bool,
    ) -> Result<String> {
        let body = body.trim();
        if body.is_empty() {
            return Err(StoreError::InvalidInput("message cannot be empty".into()));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if membership(&tx, conversation_id, me)?.is_none() {
                if !allow_legacy_direct_keys {
                    return Err(StoreError::Forbidden);
                }
                ensure_direct_membership_from_key(&tx, conversation_id, me)?;
                require_membership(&tx, conversation_id, me)?;
            }

            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, body, created_at, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![id, conversation_id, me, body, now],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    /// The most recent `limit` messages in chronological order, with sender
    /// identity and a per-emoji reaction summary. Non-members get an empty
    /// list rather than an error so the UI renders "not found" generically.
    pub fn list_messages(&self, me: &str, conversation_id: &str, limit: u32) -> Result<Vec<MessageResponse>> {
        let limit = limit.clamp(1, 200);

        self.with_conn(|conn| {
            if membership(conn, conversation_id, me)?.is_none() {
                return Ok(Vec::new());
            }

            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, body, created_at, deleted
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(params![conversation_id, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        body: row.get(3)?,
                        created_at: row.get(4)?,
                        deleted: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();

            let sender_ids: HashSet<String> = rows.iter().map(|r| r.sender_id.clone()).collect();
            let mut senders: HashMap<String, UserRow> = HashMap::new();
            for id in &sender_ids {
                if let Some(user) = user_by_id(conn, id)? {
                    senders.insert(id.clone(), user);
                }
            }

            let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let reaction_rows = reactions_for_messages(conn, &message_ids)?;
            let mut by_message: HashMap<String, Vec<&ReactionRow>> = HashMap::new();
            for r in &reaction_rows {
                by_message.entry(r.message_id.clone()).or_default().push(r);
            }

            Ok(rows
                .into_iter()
                .map(|row| {
                    let mut counts: HashMap<&str, usize> = HashMap::new();
                    let mut mine: HashSet<&str> = HashSet::new();
                    if let Some(rs) = by_message.get(&row.id) {
                        for r in rs {
                            *counts.entry(r.emoji.as_str()).or_default() += 1;
                            if r.user_id == me {
                                mine.insert(r.emoji.as_str());
                            }
                        }
                    }
                    let reactions = ALLOWED_REACTIONS
                        .iter()
                        .map(|&emoji| ReactionSummary {
                            emoji: emoji.to_string(),
                            count: counts.get(emoji).copied().unwrap_or(0),
                            reacted_by_me: mine.contains(emoji),
                        })
                        .filter(|r| r.count > 0 || r.reacted_by_me)
                        .collect();

                    let body = if row.deleted {
                        DELETED_MESSAGE_PLACEHOLDER.to_string()
                    } else {
                        row.body
                    };

                    MessageResponse {
                        id: parse_uuid(&row.id, "message id"),
                        conversation_id: parse_uuid(&row.conversation_id, "conversation id"),
                        sender_id: parse_uuid(&row.sender_id, "sender id"),
                        sender: senders.get(&row.sender_id).cloned().map(UserRow::into_model),
                        body,
                        created_at: row.created_at,
                        deleted: row.deleted,
                        reactions,
                    }
                })
                .collect())
        })
    }

    /// Soft delete: only the sender may delete, and only if they are still
    /// a member; the body stays in storage. Idempotent. Returns the
    /// conversation id for change notification.
    pub fn soft_delete_message(&self, me: &str, message_id: &str) -> Result<String> {
        self.with_conn_mut(|conn| {
            let message = message_by_id(conn, message_id)?.ok_or(StoreError::NotFound)?;
            require_membership(conn, &message.conversation_id, me)?;
            if message.sender_id != me {
                return Err(StoreError::Forbidden);
            }
            if !message.deleted {
                conn.execute("UPDATE messages SET deleted = 1 WHERE id = ?1", [message_id])?;
            }
            Ok(message.conversation_id)
        })
    }
}

/// Compatibility shim for conversations created by the old scheme that
/// keyed direct pairs on a `{userA}_{userB}` string instead of membership
/// rows. Provisions memberships for both parties when the caller is one
/// of them.
fn ensure_direct_membership_from_key(conn: &Connection, conversation_id: &str, me: &str) -> Result<()> {
    let conversation = conversation_by_id(conn, conversation_id)?.ok_or(StoreError::NotFound)?;
    let direct_key = conversation.direct_key.ok_or(StoreError::Forbidden)?;

    let parts: Vec<&str> = direct_key.split('_').filter(|p| !p.is_empty()).collect();
    let [a, b] = parts.as_slice() else {
        return Err(StoreError::Forbidden);
    };
    if me != *a && me != *b {
        return Err(StoreError::Forbidden);
    }

    insert_membership(conn, conversation_id, a)?;
    insert_membership(conn, conversation_id, b)?;
    Ok(())
}

pub(crate) fn message_by_id(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            "SELECT id, conversation_id, sender_id, body, created_at, deleted
             FROM messages WHERE id = ?1",
            [id],
            |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    body: row.get(3)?,
                    created_at: row.get(4)?,
                    deleted: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Batch-fetch reactions for a page of messages with one IN query.
fn reactions_for_messages(conn: &Connection, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
    if message_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM message_reactions WHERE message_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_vec: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params_vec.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn direct(db: &Database) -> (String, String, String) {
        let a = testing::user(db, "a");
        let b = testing::user(db, "b");
        let c = db.start_direct(&a, &b, 100).unwrap();
        (a, b, c)
    }

    #[test]
    fn send_trims_and_rejects_empty_bodies() {
        let db = testing::db();
        let (a, _, c) = direct(&db);

        assert!(matches!(
            db.send_message(&a, &c, "   \n", 200, false),
            Err(StoreError::InvalidInput(_))
        ));

        let id = db.send_message(&a, &c, "  hi  ", 200, false).unwrap();
        let messages = db.list_messages(&a, &c, 50).unwrap();
        assert_eq!(messages[0].id.to_string(), id);
        assert_eq!(messages[0].body, "hi");
    }

    #[test]
    fn send_requires_membership() {
        let db = testing::db();
        let (_, _, c) = direct(&db);
        let outsider = testing::user(&db, "outsider");

        assert!(matches!(
            db.send_message(&outsider, &c, "hi", 200, false),
            Err(StoreError::Forbidden)
        ));
        // The legacy flag alone does not help without a direct key.
        assert!(matches!(
            db.send_message(&outsider, &c, "hi", 200, true),
            Err(StoreError::Forbidden)
        ));
    }

    #[test]
    fn send_bumps_last_message_at() {
        let db = testing::db();
        let (a, _, c) = direct(&db);
        db.send_message(&a, &c, "hi", 1234, false).unwrap();

        let detail = db.get_conversation(&a, &c).unwrap().unwrap();
        assert_eq!(detail.conversation.last_message_at, Some(1234));
    }

    #[test]
    fn list_restores_chronological_order_and_attaches_senders() {
        let db = testing::db();
        let (a, b, c) = direct(&db);
        db.send_message(&a, &c, "first", 200, false).unwrap();
        db.send_message(&b, &c, "second", 300, false).unwrap();
        db.send_message(&a, &c, "third", 400, false).unwrap();

        let messages = db.list_messages(&b, &c, 2).unwrap();
        let bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["second", "third"]);
        assert_eq!(messages[0].sender.as_ref().unwrap().name, "b");
        assert_eq!(messages[1].sender.as_ref().unwrap().name, "a");
    }

    #[test]
    fn list_is_empty_for_non_members() {
        let db = testing::db();
        let (a, _, c) = direct(&db);
        let outsider = testing::user(&db, "outsider");

        db.send_message(&a, &c, "hi", 200, false).unwrap();
        assert!(db.list_messages(&outsider, &c, 50).unwrap().is_empty());
    }

    #[test]
    fn soft_delete_is_sender_only_idempotent_and_redacted() {
        let db = testing::db();
        let (a, b, c) = direct(&db);
        let m = db.send_message(&a, &c, "secret", 200, false).unwrap();

        assert!(matches!(
            db.soft_delete_message(&b, &m),
            Err(StoreError::Forbidden)
        ));

        db.soft_delete_message(&a, &m).unwrap();
        db.soft_delete_message(&a, &m).unwrap(); // idempotent

        let messages = db.list_messages(&b, &c, 50).unwrap();
        assert!(messages[0].deleted);
        assert_eq!(messages[0].body, DELETED_MESSAGE_PLACEHOLDER);

        // Still physically present.
        db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM messages WHERE id = ?1", [&m], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn legacy_direct_key_provisions_both_parties() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");

        // A conversation written by the old scheme: no membership rows,
        // only the composite key.
        let legacy_id = "legacy-conversation";
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, is_group, name, created_at, direct_key)
                 VALUES (?1, 0, NULL, 50, ?2)",
                rusqlite::params![legacy_id, format!("{a}_{b}")],
            )?;
            Ok(())
        })
        .unwrap();

        // Without the flag the caller stays locked out.
        assert!(matches!(
            db.send_message(&a, legacy_id, "hi", 200, false),
            Err(StoreError::Forbidden)
        ));

        db.send_message(&a, legacy_id, "hi", 200, true).unwrap();

        // Both parties were provisioned, so b can read and reply.
        assert_eq!(db.list_messages(&b, legacy_id, 50).unwrap().len(), 1);
        db.send_message(&b, legacy_id, "yo", 300, false).unwrap();

        // A stranger is still rejected even with the flag.
        let outsider = testing::user(&db, "outsider");
        assert!(matches!(
            db.send_message(&outsider, legacy_id, "hi", 400, true),
            Err(StoreError::Forbidden)
        ));
    }
}
