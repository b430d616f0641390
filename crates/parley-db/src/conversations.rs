use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use parley_types::api::{ConversationDetail, ConversationSummary};
use parley_types::models::DELETED_MESSAGE_PLACEHOLDER;

use crate::models::{ConversationRow, MemberRow, UserRow};
use crate::users::user_by_id;
use crate::{Database, Result, StoreError};

impl Database {
    /// Find or create the direct conversation between `me` and `other`.
    ///
    /// Dedup is a linear scan over the caller's non-group memberships,
    /// not a derived pair key; the schema's `direct_key` column is a
    /// legacy artifact and is deliberately not consulted here.
    pub fn start_direct(&self, me: &str, other: &str, now: i64) -> Result<String> {
        if me == other {
            return Err(StoreError::InvalidInput(
                "cannot start a conversation with yourself".into(),
            ));
        }

        self.with_conn_mut(|conn| {
            if user_by_id(conn, other)?.is_none() {
                return Err(StoreError::NotFound);
            }

            for m in memberships_of(conn, me)? {
                let Some(conversation) = conversation_by_id(conn, &m.conversation_id)? else {
                    continue;
                };
                if conversation.is_group {
                    continue;
                }
                if membership(conn, &conversation.id, other)?.is_some() {
                    return Ok(conversation.id);
                }
            }

            let tx = conn.transaction()?;
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO conversations (id, is_group, name, created_at, last_message_at)
                 VALUES (?1, 0, NULL, ?2, NULL)",
                params![id, now],
            )?;
            insert_membership(&tx, &id, me)?;
            insert_membership(&tx, &id, other)?;
            tx.commit()?;
            Ok(id)
        })
    }

    /// Create a group conversation. The creator is always a member, even
    /// when omitted from `member_ids`; duplicates collapse.
    pub fn create_group(&self, me: &str, name: &str, member_ids: &[String], now: i64) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("group name is required".into()));
        }

        let mut members: Vec<&str> = vec![me];
        for id in member_ids {
            if !members.contains(&id.as_str()) {
                members.push(id);
            }
        }

        self.with_conn_mut(|conn| {
            for member in &members {
                if user_by_id(conn, member)?.is_none() {
                    return Err(StoreError::NotFound);
                }
            }

            let tx = conn.transaction()?;
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO conversations (id, is_group, name, created_at, last_message_at)
                 VALUES (?1, 1, ?2, ?3, NULL)",
                params![id, name, now],
            )?;
            for member in &members {
                insert_membership(&tx, &id, member)?;
            }
            tx.commit()?;
            Ok(id)
        })
    }

    /// The caller's conversation list, newest activity first.
    pub fn list_for_user(&self, me: &str) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut items = Vec::new();

            for m in memberships_of(conn, me)? {
                let Some(conversation) = conversation_by_id(conn, &m.conversation_id)? else {
                    continue;
                };

                let member_users = conversation_users(conn, &conversation.id)?;
                let other_user = if conversation.is_group {
                    None
                } else {
                    member_users.iter().find(|u| u.id != me).cloned()
                };

                // A direct conversation whose peer has never been
                // provisioned is invisible until they show up.
                if !conversation.is_group {
                    let placeholder = match &other_user {
                        None => true,
                        Some(u) => u.name == parley_types::models::UNKNOWN_NAME && u.email.is_empty(),
                    };
                    if placeholder {
                        continue;
                    }
                }

                let last = last_message(conn, &conversation.id)?;
                let last_message_text = match &last {
                    Some((_, true, _)) => DELETED_MESSAGE_PLACEHOLDER.to_string(),
                    Some((body, false, _)) => body.clone(),
                    None => String::new(),
                };
                let last_message_at = last.as_ref().map(|(_, _, at)| *at).unwrap_or(0);

                let unread_count: usize = conn.query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE conversation_id = ?1 AND created_at > ?2 AND sender_id != ?3",
                    params![conversation.id, m.last_read_at, me],
                    |row| row.get::<_, i64>(0),
                )? as usize;

                items.push(ConversationSummary {
                    conversation_id: crate::models::parse_uuid(&conversation.id, "conversation id"),
                    is_group: conversation.is_group,
                    name: conversation.name.clone().unwrap_or_default(),
                    member_count: member_users.len(),
                    other_user: other_user.map(UserRow::into_model),
                    last_message_text,
                    last_message_at,
                    unread_count,
                });
            }

            items.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
            Ok(items)
        })
    }

    /// One conversation with members and the caller's watermark.
    /// `None` for a missing conversation and for a non-member alike, so
    /// existence never leaks to outsiders.
    pub fn get_conversation(&self, me: &str, conversation_id: &str) -> Result<Option<ConversationDetail>> {
        self.with_conn(|conn| {
            let Some(conversation) = conversation_by_id(conn, conversation_id)? else {
                return Ok(None);
            };
            let Some(m) = membership(conn, conversation_id, me)? else {
                return Ok(None);
            };

            let member_users = conversation_users(conn, conversation_id)?;
            let other_user = if conversation.is_group {
                None
            } else {
                member_users.iter().find(|u| u.id != me).cloned()
            };

            Ok(Some(ConversationDetail {
                conversation: conversation.into_model(),
                members: member_users.into_iter().map(UserRow::into_model).collect(),
                other_user: other_user.map(UserRow::into_model),
                last_read_at: m.last_read_at,
            }))
        })
    }

    pub fn mark_as_read(&self, me: &str, conversation_id: &str, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            require_membership(conn, conversation_id, me)?;
            conn.execute(
                "UPDATE conversation_members SET last_read_at = ?1
                 WHERE conversation_id = ?2 AND user_id = ?3",
                params![now, conversation_id, me],
            )?;
            Ok(())
        })
    }

    pub fn rename_group(&self, me: &str, conversation_id: &str, name: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            require_group(conn, conversation_id)?;
            require_membership(conn, conversation_id, me)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(StoreError::InvalidInput("group name is required".into()));
            }
            conn.execute(
                "UPDATE conversations SET name = ?1 WHERE id = ?2",
                params![name, conversation_id],
            )?;
            Ok(())
        })
    }

    /// Remove the caller from a group. When the last member leaves the
    /// conversation is cascade-deleted; returns whether that happened.
    pub fn leave_group(&self, me: &str, conversation_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            require_group(conn, conversation_id)?;
            require_membership(conn, conversation_id, me)?;

            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, me],
            )?;
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM conversation_members WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            let deleted = remaining == 0;
            if deleted {
                delete_cascade(&tx, conversation_id)?;
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Delete a group for everyone, regardless of remaining members.
    pub fn delete_group(&self, me: &str, conversation_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            require_group(conn, conversation_id)?;
            require_membership(conn, conversation_id, me)?;

            let tx = conn.transaction()?;
            delete_cascade(&tx, conversation_id)?;
            tx.commit()?;
            Ok(())
        })
    }
}

/// Delete a conversation and everything hanging off it, children before
/// parents: reactions, messages, typing indicators, memberships, then the
/// conversation row. Must run inside the caller's transaction.
fn delete_cascade(conn: &Connection, conversation_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM message_reactions WHERE message_id IN
            (SELECT id FROM messages WHERE conversation_id = ?1)",
        [conversation_id],
    )?;
    conn.execute("DELETE FROM messages WHERE conversation_id = ?1", [conversation_id])?;
    conn.execute(
        "DELETE FROM typing_indicators WHERE conversation_id = ?1",
        [conversation_id],
    )?;
    conn.execute(
        "DELETE FROM conversation_members WHERE conversation_id = ?1",
        [conversation_id],
    )?;
    conn.execute("DELETE FROM conversations WHERE id = ?1", [conversation_id])?;
    Ok(())
}

pub(crate) fn conversation_by_id(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT id, is_group, name, created_at, last_message_at, direct_key
             FROM conversations WHERE id = ?1",
            [id],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    is_group: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                    last_message_at: row.get(4)?,
                    direct_key: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn membership(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
) -> Result<Option<MemberRow>> {
    let row = conn
        .query_row(
            "SELECT conversation_id, user_id, last_read_at FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
            |row| {
                Ok(MemberRow {
                    conversation_id: row.get(0)?,
                    user_id: row.get(1)?,
                    last_read_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Membership is the sole authorization token for conversation access.
pub(crate) fn require_membership(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
) -> Result<MemberRow> {
    membership(conn, conversation_id, user_id)?.ok_or(StoreError::Forbidden)
}

fn require_group(conn: &Connection, conversation_id: &str) -> Result<ConversationRow> {
    let conversation = conversation_by_id(conn, conversation_id)?.ok_or(StoreError::NotFound)?;
    if !conversation.is_group {
        return Err(StoreError::InvalidInput("not a group conversation".into()));
    }
    Ok(conversation)
}

pub(crate) fn insert_membership(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, last_read_at)
         VALUES (?1, ?2, 0)",
        params![conversation_id, user_id],
    )?;
    Ok(())
}

fn memberships_of(conn: &Connection, user_id: &str) -> Result<Vec<MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, user_id, last_read_at FROM conversation_members
         WHERE user_id = ?1",
    )?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(MemberRow {
                conversation_id: row.get(0)?,
                user_id: row.get(1)?,
                last_read_at: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn conversation_users(conn: &Connection, conversation_id: &str) -> Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.subject_id, u.name, u.email, u.image_url, u.is_online, u.last_seen, u.created_at
         FROM conversation_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.conversation_id = ?1",
    )?;
    let rows = stmt
        .query_map([conversation_id], crate::users::map_user)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn last_message(conn: &Connection, conversation_id: &str) -> Result<Option<(String, bool, i64)>> {
    let row = conn
        .query_row(
            "SELECT body, deleted, created_at FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [conversation_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn start_direct_rejects_self() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        assert!(matches!(
            db.start_direct(&a, &a, 100),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn start_direct_is_idempotent_in_both_directions() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");

        let c1 = db.start_direct(&a, &b, 100).unwrap();
        let c2 = db.start_direct(&a, &b, 200).unwrap();
        let c3 = db.start_direct(&b, &a, 300).unwrap();
        assert_eq!(c1, c2);
        assert_eq!(c1, c3);
    }

    #[test]
    fn start_direct_does_not_reuse_groups() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");

        let group = db.create_group(&a, "Team", &[b.clone()], 100).unwrap();
        let direct = db.start_direct(&a, &b, 200).unwrap();
        assert_ne!(group, direct);
    }

    #[test]
    fn create_group_always_includes_creator() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");

        // Creator omitted from the member list, and b duplicated.
        let id = db.create_group(&a, "Team", &[b.clone(), b.clone()], 100).unwrap();

        let detail = db.get_conversation(&a, &id).unwrap().unwrap();
        assert_eq!(detail.members.len(), 2);
        assert!(detail.conversation.is_group);
    }

    #[test]
    fn create_group_requires_name() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        assert!(matches!(
            db.create_group(&a, "   ", &[], 100),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn get_conversation_hides_existence_from_non_members() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let outsider = testing::user(&db, "outsider");

        let id = db.start_direct(&a, &b, 100).unwrap();
        assert!(db.get_conversation(&outsider, &id).unwrap().is_none());
        assert!(db.get_conversation(&a, "no-such-id").unwrap().is_none());
    }

    #[test]
    fn unread_counts_follow_the_watermark() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let id = db.start_direct(&a, &b, 100).unwrap();

        db.send_message(&a, &id, "one", 200, false).unwrap();
        db.send_message(&a, &id, "two", 300, false).unwrap();
        // b's own message never counts against b.
        db.send_message(&b, &id, "mine", 400, false).unwrap();

        let list = db.list_for_user(&b).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].unread_count, 2);

        db.mark_as_read(&b, &id, 500).unwrap();
        let list = db.list_for_user(&b).unwrap();
        assert_eq!(list[0].unread_count, 0);
    }

    #[test]
    fn list_redacts_deleted_last_message_and_sorts_by_activity() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let c = testing::user(&db, "c");

        let quiet = db.start_direct(&a, &b, 100).unwrap();
        let busy = db.start_direct(&a, &c, 100).unwrap();
        db.send_message(&a, &quiet, "old", 200, false).unwrap();
        let m = db.send_message(&c, &busy, "secret", 300, false).unwrap();
        db.soft_delete_message(&c, &m).unwrap();

        let list = db.list_for_user(&a).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_id.to_string(), busy);
        assert_eq!(list[0].last_message_text, DELETED_MESSAGE_PLACEHOLDER);
        assert_eq!(list[1].last_message_text, "old");
    }

    #[test]
    fn list_hides_direct_conversations_with_placeholder_peers() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let ghost = testing::placeholder_user(&db, "sub_ghost");

        db.start_direct(&a, &ghost, 100).unwrap();
        assert!(db.list_for_user(&a).unwrap().is_empty());

        // Once the peer signs in, the conversation appears.
        db.ensure_from_identity(
            &crate::users::IdentityClaim {
                subject_id: "sub_ghost".to_string(),
                name: "Ghost".to_string(),
                email: "ghost@example.com".to_string(),
                image_url: String::new(),
            },
            200,
        )
        .unwrap();
        assert_eq!(db.list_for_user(&a).unwrap().len(), 1);
    }

    #[test]
    fn rename_group_rejects_direct_conversations() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let id = db.start_direct(&a, &b, 100).unwrap();
        assert!(matches!(
            db.rename_group(&a, &id, "Nope"),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn leaving_keeps_the_group_until_the_last_member() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let c = testing::user(&db, "c");
        let id = db.create_group(&a, "Team", &[b.clone(), c.clone()], 100).unwrap();
        db.send_message(&a, &id, "hello", 200, false).unwrap();

        assert!(!db.leave_group(&c, &id).unwrap());
        assert!(!db.leave_group(&b, &id).unwrap());

        // Messages survive for the remaining member.
        assert_eq!(db.list_messages(&a, &id, 50).unwrap().len(), 1);

        assert!(db.leave_group(&a, &id).unwrap());
        assert!(db.get_conversation(&a, &id).unwrap().is_none());
    }

    #[test]
    fn cascade_removes_children_before_the_conversation() {
        let db = testing::db();
        let a = testing::user(&db, "a");
        let b = testing::user(&db, "b");
        let id = db.create_group(&a, "Team", &[b.clone()], 100).unwrap();

        let m = db.send_message(&a, &id, "hello", 200, false).unwrap();
        db.toggle_reaction(&b, &m, "👍").unwrap();
        db.set_typing(&b, &id, true, 200).unwrap();

        db.delete_group(&a, &id).unwrap();

        db.with_conn(|conn| {
            for (table, column) in [
                ("messages", "conversation_id"),
                ("typing_indicators", "conversation_id"),
                ("conversation_members", "conversation_id"),
                ("conversations", "id"),
            ] {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
                    [&id],
                    |row| row.get(0),
                )?;
                assert_eq!(count, 0, "{table} not emptied");
            }
            let reactions: i64 =
                conn.query_row("SELECT COUNT(*) FROM message_reactions", [], |row| row.get(0))?;
            assert_eq!(reactions, 0);
            Ok(())
        })
        .unwrap();
    }
}
