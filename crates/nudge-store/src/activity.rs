//! Append-only reply log.

use nudge_core::error::Result;
use nudge_core::types::Activity;

use crate::{NudgeDb, fmt_ts, parse_ts, store_err};

impl NudgeDb {
    /// Append one reply. `question_id` is None when correlation failed — the
    /// reply is still recorded, just unattributed.
    pub fn log_activity(&self, activity: &Activity) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activity_log (user_id, question_id, reply_text, logged_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                activity.user_id,
                activity.question_id,
                activity.text,
                fmt_ts(activity.timestamp),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn recent_activity(&self, user_id: i64, limit: usize) -> Result<Vec<Activity>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, question_id, reply_text, logged_at
                 FROM activity_log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(rusqlite::params![user_id, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(store_err)?;
        let mut entries = Vec::new();
        for raw in rows {
            let (user_id, question_id, text, logged_at) = raw.map_err(store_err)?;
            entries.push(Activity {
                user_id,
                question_id,
                text,
                timestamp: parse_ts(&logged_at)?,
            });
        }
        Ok(entries)
    }
}
