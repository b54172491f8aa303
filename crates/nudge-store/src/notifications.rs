//! Reply-correlation records.
//!
//! Each outbound prompt leaves a `question_notifications` row; an inbound
//! reply's "in-reply-to" id resolves back through it to the question that
//! prompted the reply. Records expire after a fixed TTL and are garbage
//! collected by `sweep_notifications`, but resolution treats an expired,
//! not-yet-swept row as absent either way.

use chrono::{DateTime, Duration, Utc};

use nudge_core::error::Result;

use crate::{NudgeDb, fmt_ts, store_err};

impl NudgeDb {
    /// Insert a correlation record with `expires_at = sent_at + ttl`.
    pub fn record_notification(
        &self,
        user_id: i64,
        question_id: i64,
        outbound_message_id: i64,
        sent_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<i64> {
        if ttl <= Duration::zero() {
            return Err(store_err("correlation TTL must be positive"));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO question_notifications
             (user_id, question_id, outbound_message_id, sent_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                user_id,
                question_id,
                outbound_message_id,
                fmt_ts(sent_at),
                fmt_ts(sent_at + ttl),
            ],
        )
        .map_err(store_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Resolve an inbound reply reference to a question id. Returns None on
    /// no match or when the matching record has expired, swept or not.
    pub fn resolve_notification(
        &self,
        user_id: i64,
        outbound_message_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT question_id FROM question_notifications
             WHERE user_id = ?1 AND outbound_message_id = ?2 AND expires_at > ?3
             ORDER BY sent_at DESC LIMIT 1",
            rusqlite::params![user_id, outbound_message_id, fmt_ts(now)],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(store_err(other)),
        })
    }

    /// Delete exactly the expired subset. Idempotent; safe to run while
    /// records are being inserted and resolved.
    pub fn sweep_notifications(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM question_notifications WHERE expires_at < ?1",
                [fmt_ts(now)],
            )
            .map_err(store_err)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::temp_db;
    use chrono::NaiveTime;
    use nudge_core::types::{NewQuestion, User};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn seed(db: &NudgeDb, user_id: i64) -> i64 {
        db.upsert_user(&User::new(user_id, t(9, 0), t(22, 0), 60).unwrap())
            .unwrap();
        db.create_question(&NewQuestion {
            user_id,
            name: "mood".into(),
            text: "How are you?".into(),
            window_start: t(9, 0),
            window_end: t(22, 0),
            interval_minutes: 120,
            is_default: true,
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_resolve_most_recent_match() {
        let (db, dir) = temp_db("notif-resolve");
        let qid = seed(&db, 1);
        let now = Utc::now();
        let ttl = Duration::days(90);

        db.record_notification(1, qid, 555, now - Duration::hours(2), ttl)
            .unwrap();
        assert_eq!(db.resolve_notification(1, 555, now).unwrap(), Some(qid));
        // Wrong user or unknown message id: no match.
        assert_eq!(db.resolve_notification(2, 555, now).unwrap(), None);
        assert_eq!(db.resolve_notification(1, 556, now).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_expired_record_is_absent_before_sweep() {
        let (db, dir) = temp_db("notif-ttl");
        let qid = seed(&db, 1);
        let sent = Utc::now() - Duration::days(120);
        db.record_notification(1, qid, 777, sent, Duration::days(90))
            .unwrap();

        // Reply arrives 4 months after a 3-month TTL: unattributed, even
        // though nothing has swept the row yet.
        assert_eq!(db.resolve_notification(1, 777, Utc::now()).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sweep_removes_exactly_expired_subset() {
        let (db, dir) = temp_db("notif-sweep");
        let qid = seed(&db, 1);
        let now = Utc::now();
        let ttl = Duration::days(90);

        db.record_notification(1, qid, 1, now - Duration::days(100), ttl)
            .unwrap();
        db.record_notification(1, qid, 2, now - Duration::days(91), ttl)
            .unwrap();
        db.record_notification(1, qid, 3, now - Duration::days(10), ttl)
            .unwrap();

        assert_eq!(db.sweep_notifications(now).unwrap(), 2);
        // Idempotent.
        assert_eq!(db.sweep_notifications(now).unwrap(), 0);
        // The live record survived.
        assert_eq!(db.resolve_notification(1, 3, now).unwrap(), Some(qid));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_ttl_must_be_positive() {
        let (db, dir) = temp_db("notif-badttl");
        let qid = seed(&db, 1);
        assert!(
            db.record_notification(1, qid, 9, Utc::now(), Duration::zero())
                .is_err()
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
