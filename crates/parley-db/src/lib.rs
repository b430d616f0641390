pub mod error;
pub mod migrations;
pub mod models;

mod conversations;
mod messages;
mod reactions;
mod typing;
mod users;

pub use error::{Result, StoreError};
pub use typing::TYPING_TTL_MS;
pub use users::{IdentityClaim, PRESENCE_STALE_AFTER_MS};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Mutable access for multi-statement mutations; callers open a
    /// `Connection::transaction()` so each handler is all-or-nothing.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}

/// Current time as epoch milliseconds, the unit every timestamp column uses.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::users::IdentityClaim;
    use crate::Database;

    pub fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    /// Seed a fully-provisioned user and return their id.
    pub fn user(db: &Database, name: &str) -> String {
        db.upsert_from_webhook(
            &IdentityClaim {
                subject_id: format!("sub_{name}"),
                name: name.to_string(),
                email: format!("{name}@example.com"),
                image_url: String::new(),
            },
            1_000,
        )
        .unwrap()
    }

    /// Seed a placeholder user (no profile claims yet).
    pub fn placeholder_user(db: &Database, subject: &str) -> String {
        db.upsert_from_webhook(
            &IdentityClaim {
                subject_id: subject.to_string(),
                name: String::new(),
                email: String::new(),
                image_url: String::new(),
            },
            1_000,
        )
        .unwrap()
    }
}
