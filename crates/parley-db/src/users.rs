use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use parley_types::models::UNKNOWN_NAME;

use crate::models::UserRow;
use crate::{Database, Result, StoreError};

/// Online users whose last heartbeat is older than this are swept offline.
pub const PRESENCE_STALE_AFTER_MS: i64 = 60_000;

/// Identity claims for one user, as carried by a session token or a
/// provider webhook event.
#[derive(Debug, Clone)]
pub struct IdentityClaim {
    pub subject_id: String,
    pub name: String,
    pub email: String,
    pub image_url: String,
}

fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

impl Database {
    /// Webhook-driven reconciliation: insert on first sight (offline,
    /// since no session is attached), otherwise overwrite the profile
    /// fields with whatever the provider pushed.
    pub fn upsert_from_webhook(&self, claim: &IdentityClaim, now: i64) -> Result<String> {
        self.with_conn_mut(|conn| {
            let existing = user_by_subject(conn, &claim.subject_id)?;
            let name = normalize_name(&claim.name);

            if let Some(user) = existing {
                conn.execute(
                    "UPDATE users SET name = ?1, email = ?2, image_url = ?3, last_seen = ?4
                     WHERE id = ?5",
                    params![name, claim.email, claim.image_url, now, user.id],
                )?;
                return Ok(user.id);
            }

            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO users (id, subject_id, name, email, image_url, is_online, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
                params![id, claim.subject_id, name, claim.email, claim.image_url, now],
            )?;
            Ok(id)
        })
    }

    /// Client-initiated sync: the caller has an active session, so the
    /// user goes online immediately. Unlike the webhook path this never
    /// overwrites a field the user already has set; claims only fill
    /// blanks.
    ///
    /// Returns the row as stored after the call, plus whether the user
    /// was already online beforehand.
    pub fn ensure_from_identity(&self, claim: &IdentityClaim, now: i64) -> Result<(UserRow, bool)> {
        self.with_conn_mut(|conn| {
            let existing = user_by_subject(conn, &claim.subject_id)?;

            let Some(mut user) = existing else {
                let id = Uuid::new_v4().to_string();
                let name = normalize_name(&claim.name);
                conn.execute(
                    "INSERT INTO users (id, subject_id, name, email, image_url, is_online, last_seen, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                    params![id, claim.subject_id, name, claim.email, claim.image_url, now],
                )?;
                let row = UserRow {
                    id,
                    subject_id: claim.subject_id.clone(),
                    name,
                    email: claim.email.clone(),
                    image_url: claim.image_url.clone(),
                    is_online: true,
                    last_seen: now,
                    created_at: now,
                };
                return Ok((row, false));
            };

            let was_online = user.is_online;
            let claimed_name = normalize_name(&claim.name);
            if (user.name.is_empty() || user.name == UNKNOWN_NAME) && claimed_name != UNKNOWN_NAME {
                user.name = claimed_name;
            }
            if user.email.is_empty() && !claim.email.is_empty() {
                user.email = claim.email.clone();
            }
            if user.image_url.is_empty() && !claim.image_url.is_empty() {
                user.image_url = claim.image_url.clone();
            }
            user.is_online = true;
            user.last_seen = now;

            conn.execute(
                "UPDATE users SET name = ?1, email = ?2, image_url = ?3, is_online = 1, last_seen = ?4
                 WHERE id = ?5",
                params![user.name, user.email, user.image_url, now, user.id],
            )?;
            Ok((user, was_online))
        })
    }

    /// Explicit online/offline flip. A missing user record is a silent
    /// no-op, matching the read-side preference for not failing.
    pub fn set_online(&self, subject_id: &str, is_online: bool, now: i64) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let Some(mut user) = user_by_subject(conn, subject_id)? else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE id = ?3",
                params![is_online, now, user.id],
            )?;
            user.is_online = is_online;
            user.last_seen = now;
            Ok(Some(user))
        })
    }

    pub fn get_by_subject(&self, subject_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| user_by_subject(conn, subject_id))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| user_by_id(conn, id))
    }

    /// User discovery: everyone except the caller, the caller's other
    /// accounts (same email), and not-yet-provisioned placeholders.
    /// `search` filters by case-insensitive name substring.
    pub fn list_others(&self, me: &str, search: Option<&str>) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let me_row = user_by_id(conn, me)?.ok_or(StoreError::NotFound)?;
            let term = search.unwrap_or("").trim().to_lowercase();

            let mut stmt = conn.prepare(
                "SELECT id, subject_id, name, email, image_url, is_online, last_seen, created_at
                 FROM users WHERE id != ?1 ORDER BY name",
            )?;
            let rows = stmt
                .query_map([me], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .filter(|u| {
                    if !me_row.email.is_empty() && u.email == me_row.email {
                        return false;
                    }
                    if u.name == UNKNOWN_NAME && u.email.is_empty() {
                        return false;
                    }
                    term.is_empty() || u.name.to_lowercase().contains(&term)
                })
                .collect())
        })
    }

    pub fn update_profile(&self, me: &str, name: &str, image_url: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            if user_by_id(conn, me)?.is_none() {
                return Err(StoreError::NotFound);
            }
            let name = normalize_name(name);
            match image_url {
                Some(url) => {
                    conn.execute(
                        "UPDATE users SET name = ?1, image_url = ?2 WHERE id = ?3",
                        params![name, url.trim(), me],
                    )?;
                }
                None => {
                    conn.execute("UPDATE users SET name = ?1 WHERE id = ?2", params![name, me])?;
                }
            }
            Ok(())
        })
    }

    /// Presence sweep: flip every online user whose heartbeat went stale.
    /// Returns the flipped rows so the caller can notify subscribers.
    pub fn mark_stale_offline(&self, now: i64) -> Result<Vec<UserRow>> {
        self.with_conn_mut(|conn| {
            let cutoff = now - PRESENCE_STALE_AFTER_MS;
            let mut stmt = conn.prepare(
                "SELECT id, subject_id, name, email, image_url, is_online, last_seen, created_at
                 FROM users WHERE is_online = 1 AND last_seen < ?1",
            )?;
            let stale = stmt
                .query_map([cutoff], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for user in &stale {
                conn.execute("UPDATE users SET is_online = 0 WHERE id = ?1", [&user.id])?;
            }
            Ok(stale
                .into_iter()
                .map(|mut u| {
                    u.is_online = false;
                    u
                })
                .collect())
        })
    }
}

pub(crate) fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        image_url: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, subject_id, name, email, image_url, is_online, last_seen, created_at
             FROM users WHERE id = ?1",
            [id],
            map_user,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn user_by_subject(conn: &Connection, subject_id: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, subject_id, name, email, image_url, is_online, last_seen, created_at
             FROM users WHERE subject_id = ?1",
            [subject_id],
            map_user,
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn claim(subject: &str, name: &str, email: &str) -> IdentityClaim {
        IdentityClaim {
            subject_id: subject.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            image_url: String::new(),
        }
    }

    #[test]
    fn webhook_upsert_inserts_offline_then_patches() {
        let db = testing::db();
        let id = db
            .upsert_from_webhook(&claim("sub_a", "Ada", "ada@example.com"), 100)
            .unwrap();

        let user = db.get_user(&id).unwrap().unwrap();
        assert!(!user.is_online);
        assert_eq!(user.name, "Ada");
        assert_eq!(user.created_at, 100);

        let id2 = db
            .upsert_from_webhook(&claim("sub_a", "Ada L.", "ada@new.example.com"), 200)
            .unwrap();
        assert_eq!(id, id2);

        let user = db.get_user(&id).unwrap().unwrap();
        assert_eq!(user.name, "Ada L.");
        assert_eq!(user.email, "ada@new.example.com");
        assert_eq!(user.last_seen, 200);
        assert_eq!(user.created_at, 100);
    }

    #[test]
    fn blank_name_normalizes_to_unknown() {
        let db = testing::db();
        let id = db
            .upsert_from_webhook(&claim("sub_b", "   ", "b@example.com"), 100)
            .unwrap();
        assert_eq!(db.get_user(&id).unwrap().unwrap().name, UNKNOWN_NAME);
    }

    #[test]
    fn ensure_from_identity_marks_online_and_fills_blanks_only() {
        let db = testing::db();
        // Webhook created a placeholder first.
        let id = db.upsert_from_webhook(&claim("sub_c", "", ""), 100).unwrap();

        let (user, was_online) = db
            .ensure_from_identity(&claim("sub_c", "Cleo", "cleo@example.com"), 200)
            .unwrap();
        assert_eq!(user.id, id);
        assert!(!was_online);
        assert!(user.is_online);
        assert_eq!(user.name, "Cleo");
        assert_eq!(user.email, "cleo@example.com");

        // A later sync with different claims must not clobber set fields.
        let (user, was_online) = db
            .ensure_from_identity(&claim("sub_c", "Other Name", "other@example.com"), 300)
            .unwrap();
        assert!(was_online);
        assert_eq!(user.name, "Cleo");
        assert_eq!(user.email, "cleo@example.com");
        assert_eq!(user.last_seen, 300);
    }

    #[test]
    fn set_online_is_noop_for_missing_user() {
        let db = testing::db();
        assert!(db.set_online("sub_missing", true, 100).unwrap().is_none());
    }

    #[test]
    fn mark_stale_offline_flips_only_stale_users() {
        let db = testing::db();
        let stale = testing::user(&db, "stale");
        let fresh = testing::user(&db, "fresh");

        db.set_online("sub_stale", true, 10_000).unwrap();
        db.set_online("sub_fresh", true, 60_000).unwrap();

        let now = 80_000;
        let flipped = db.mark_stale_offline(now).unwrap();
        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].id, stale);

        assert!(!db.get_user(&stale).unwrap().unwrap().is_online);
        assert!(db.get_user(&fresh).unwrap().unwrap().is_online);
    }

    #[test]
    fn list_others_excludes_self_placeholders_and_matches_search() {
        let db = testing::db();
        let me = testing::user(&db, "me");
        testing::user(&db, "alice");
        testing::user(&db, "bob");
        testing::placeholder_user(&db, "sub_ghost");

        let all = db.list_others(&me, None).unwrap();
        let names: Vec<_> = all.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        let filtered = db.list_others(&me, Some("ALI")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "alice");
    }

    #[test]
    fn update_profile_normalizes_and_trims() {
        let db = testing::db();
        let me = testing::user(&db, "me");

        db.update_profile(&me, "  New Name  ", Some("  https://img  ")).unwrap();
        let user = db.get_user(&me).unwrap().unwrap();
        assert_eq!(user.name, "New Name");
        assert_eq!(user.image_url, "https://img");

        db.update_profile(&me, "", None).unwrap();
        assert_eq!(db.get_user(&me).unwrap().unwrap().name, UNKNOWN_NAME);
    }
}
