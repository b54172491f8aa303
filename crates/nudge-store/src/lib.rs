//! SQLite-backed persistence for Nudge.
//!
//! One database, four tables: `users`, `user_questions`,
//! `question_notifications` (reply correlation), `activity_log` (append-only
//! reply log). Timestamps are RFC 3339 text at fixed microsecond precision so
//! string comparison orders correctly inside SQL.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use rusqlite::Connection;

use nudge_core::error::{NudgeError, Result};

pub mod activity;
pub mod notifications;
pub mod questions;
pub mod users;

/// The persistent store. All access goes through one connection guarded by a
/// mutex; callers hold the lock only for the duration of a statement.
pub struct NudgeDb {
    conn: Mutex<Connection>,
}

impl NudgeDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        tracing::debug!("🗄️ Store ready at {}", path.display());
        Ok(db)
    }

    /// Run migrations to create tables and invariant-enforcing indexes.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                tg_id INTEGER PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                interval_minutes INTEGER NOT NULL,
                last_notification_sent TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(tg_id),
                question_name TEXT NOT NULL,
                question_text TEXT NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                interval_minutes INTEGER NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                parent_question_id INTEGER REFERENCES user_questions(id),
                last_notification_sent TEXT,
                created_at TEXT NOT NULL
            );

            -- At most one active row per (user, name), at most one active
            -- default per user.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_questions_active_name
                ON user_questions(user_id, question_name) WHERE active = 1;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_questions_active_default
                ON user_questions(user_id) WHERE active = 1 AND is_default = 1;

            CREATE TABLE IF NOT EXISTS question_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                question_id INTEGER NOT NULL REFERENCES user_questions(id),
                outbound_message_id INTEGER NOT NULL,
                sent_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                CHECK (expires_at > sent_at)
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_lookup
                ON question_notifications(user_id, outbound_message_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_expiry
                ON question_notifications(expires_at);

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                question_id INTEGER,
                reply_text TEXT NOT NULL,
                logged_at TEXT NOT NULL
            );
            ",
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| NudgeError::Store(format!("connection lock poisoned: {e}")))
    }
}

pub(crate) fn store_err(e: impl std::fmt::Display) -> NudgeError {
    NudgeError::Store(e.to_string())
}

/// Fixed-width RFC 3339 so SQL string comparison matches time ordering.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| NudgeError::Store(format!("bad timestamp `{s}`: {e}")))
}

pub(crate) fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

pub(crate) fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|e| NudgeError::Store(format!("bad time-of-day `{s}`: {e}")))
}

/// Helpers for tests in this crate and downstream crates.
pub mod test_util {
    use super::*;

    /// Open a fresh database under a unique temp path.
    pub fn temp_db(tag: &str) -> (NudgeDb, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "nudge-store-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let db = NudgeDb::open(&dir.join("test.db")).unwrap();
        (db, dir)
    }
}
