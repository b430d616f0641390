use rusqlite::params;

use crate::conversations::require_membership;
use crate::models::UserRow;
use crate::{Database, Result};

/// How long a typing flag stays live without a refresh.
pub const TYPING_TTL_MS: i64 = 2_000;

impl Database {
    /// Upsert the caller's typing flag for a conversation: one row per
    /// (conversation, user). `is_typing = false` sets an already-past
    /// expiry, invalidating immediately without needing a delete.
    pub fn set_typing(&self, me: &str, conversation_id: &str, is_typing: bool, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            require_membership(conn, conversation_id, me)?;

            let expires_at = if is_typing { now + TYPING_TTL_MS } else { 0 };
            conn.execute(
                "INSERT INTO typing_indicators (conversation_id, user_id, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET expires_at = excluded.expires_at",
                params![conversation_id, me, expires_at],
            )?;
            Ok(())
        })
    }

    /// Everyone currently typing in a conversation, excluding the caller.
    /// Expiry is enforced here at read time; the sweep only reclaims rows.
    pub fn active_typists(&self, me: &str, conversation_id: &str, now: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.subject_id, u.name, u.email, u.image_url, u.is_online, u.last_seen, u.created_at
                 FROM typing_indicators t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.conversation_id = ?1 AND t.user_id != ?2 AND t.expires_at > ?3",
            )?;
            let rows = stmt
                .query_map(params![conversation_id, me, now], crate::users::map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Typing sweep: physically delete expired rows. Read correctness never
    /// depends on this having run.
    pub fn delete_expired_typing(&self, now: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM typing_indicators WHERE expires_at <= ?1", [now])?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use crate::StoreError;

    fn direct(db: &Database) -> (String, String, String) {
        let a = testing::user(db, "a");
        let b = testing::user(db, "b");
        let c = db.start_direct(&a, &b, 100).unwrap();
        (a, b, c)
    }

    #[test]
    fn set_typing_requires_membership() {
        let db = testing::db();
        let (_, _, c) = direct(&db);
        let outsider = testing::user(&db, "outsider");
        assert!(matches!(
            db.set_typing(&outsider, &c, true, 1_000),
            Err(StoreError::Forbidden)
        ));
    }

    #[test]
    fn expiry_is_enforced_at_read_time_without_the_sweep() {
        let db = testing::db();
        let (a, b, c) = direct(&db);

        db.set_typing(&a, &c, true, 1_000).unwrap();

        // Visible to the peer before the TTL elapses, never to the typist.
        assert_eq!(db.active_typists(&b, &c, 2_000).unwrap().len(), 1);
        assert!(db.active_typists(&a, &c, 2_000).unwrap().is_empty());

        // Gone after 2000ms even though no sweep ran.
        assert!(db.active_typists(&b, &c, 3_001).unwrap().is_empty());
    }

    #[test]
    fn stop_typing_invalidates_immediately() {
        let db = testing::db();
        let (a, b, c) = direct(&db);

        db.set_typing(&a, &c, true, 1_000).unwrap();
        db.set_typing(&a, &c, false, 1_100).unwrap();
        assert!(db.active_typists(&b, &c, 1_200).unwrap().is_empty());
    }

    #[test]
    fn refresh_keeps_a_single_row_per_pair() {
        let db = testing::db();
        let (a, _, c) = direct(&db);

        db.set_typing(&a, &c, true, 1_000).unwrap();
        db.set_typing(&a, &c, true, 2_000).unwrap();

        db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM typing_indicators WHERE conversation_id = ?1",
                [&c],
                |r| r.get(0),
            )?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn sweep_reclaims_only_expired_rows() {
        let db = testing::db();
        let (a, b, c) = direct(&db);

        db.set_typing(&a, &c, true, 1_000).unwrap(); // expires 3_000
        db.set_typing(&b, &c, true, 5_000).unwrap(); // expires 7_000

        assert_eq!(db.delete_expired_typing(4_000).unwrap(), 1);
        assert_eq!(db.active_typists(&a, &c, 5_500).unwrap().len(), 1);
    }
}
