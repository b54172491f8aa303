//! Question rows and the immutable version chain.
//!
//! Editing a question never mutates its row: the edit inserts a successor
//! linked through `parent_question_id` and deactivates the predecessor, so
//! old correlation records keep pointing at the exact text that was sent.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use nudge_core::error::Result;
use nudge_core::types::{NewQuestion, Question};

use crate::{NudgeDb, fmt_time, fmt_ts, parse_time, parse_ts, store_err};

const QUESTION_COLUMNS: &str = "id, user_id, question_name, question_text, window_start, window_end, \
     interval_minutes, is_default, active, parent_question_id, last_notification_sent, created_at";

type RawQuestion = (
    i64,
    i64,
    String,
    String,
    String,
    String,
    i64,
    bool,
    bool,
    Option<i64>,
    Option<String>,
    String,
);

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<RawQuestion> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get::<_, i64>(7)? != 0,
        row.get::<_, i64>(8)? != 0,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn build_question(raw: RawQuestion) -> Result<Question> {
    let (id, user_id, name, text, ws, we, interval, is_default, active, parent, last, created) =
        raw;
    Ok(Question {
        id,
        user_id,
        name,
        text,
        window_start: parse_time(&ws)?,
        window_end: parse_time(&we)?,
        interval_minutes: interval,
        is_default,
        active,
        parent_question_id: parent,
        last_notification_sent: last.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created)?,
    })
}

impl NudgeDb {
    /// Create a new active question. When `is_default` is set, any existing
    /// active default for the user loses the flag first so the
    /// one-active-default invariant holds.
    pub fn create_question(&self, new: &NewQuestion) -> Result<Question> {
        new.validate()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;

        if new.is_default {
            tx.execute(
                "UPDATE user_questions SET is_default = 0 WHERE user_id = ?1 AND active = 1 AND is_default = 1",
                [new.user_id],
            )
            .map_err(store_err)?;
        }

        tx.execute(
            "INSERT INTO user_questions
             (user_id, question_name, question_text, window_start, window_end, interval_minutes,
              is_default, active, parent_question_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, NULL, ?8)",
            rusqlite::params![
                new.user_id,
                new.name,
                new.text,
                fmt_time(new.window_start),
                fmt_time(new.window_end),
                new.interval_minutes,
                new.is_default as i64,
                fmt_ts(Utc::now()),
            ],
        )
        .map_err(store_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(store_err)?;
        drop(conn);

        self.get_question(id)?
            .ok_or_else(|| store_err("question vanished after insert"))
    }

    /// Version-chain edit: deactivate the current row and insert a successor
    /// carrying the new text/schedule with `parent_question_id` set. Returns
    /// the successor.
    pub fn edit_question(&self, question_id: i64, updated: &NewQuestion) -> Result<Question> {
        updated.validate()?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;

        let changed = tx
            .execute(
                "UPDATE user_questions SET active = 0 WHERE id = ?1 AND active = 1",
                [question_id],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(store_err(format!(
                "question {question_id} is not an active question"
            )));
        }

        if updated.is_default {
            tx.execute(
                "UPDATE user_questions SET is_default = 0 WHERE user_id = ?1 AND active = 1 AND is_default = 1",
                [updated.user_id],
            )
            .map_err(store_err)?;
        }

        tx.execute(
            "INSERT INTO user_questions
             (user_id, question_name, question_text, window_start, window_end, interval_minutes,
              is_default, active, parent_question_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9)",
            rusqlite::params![
                updated.user_id,
                updated.name,
                updated.text,
                fmt_time(updated.window_start),
                fmt_time(updated.window_end),
                updated.interval_minutes,
                updated.is_default as i64,
                question_id,
                fmt_ts(Utc::now()),
            ],
        )
        .map_err(store_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(store_err)?;
        drop(conn);

        self.get_question(id)?
            .ok_or_else(|| store_err("question vanished after edit"))
    }

    pub fn deactivate_question(&self, question_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE user_questions SET active = 0 WHERE id = ?1",
            [question_id],
        )
        .map_err(store_err)?;
        Ok(())
    }

    pub fn get_question(&self, question_id: i64) -> Result<Option<Question>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {QUESTION_COLUMNS} FROM user_questions WHERE id = ?1"),
                [question_id],
                question_from_row,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(store_err(other)),
            })?;
        raw.map(build_question).transpose()
    }

    pub fn list_active_questions(&self, user_id: i64) -> Result<Vec<Question>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {QUESTION_COLUMNS} FROM user_questions WHERE user_id = ?1 AND active = 1 ORDER BY id"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], question_from_row)
            .map_err(store_err)?;
        let mut questions = Vec::new();
        for raw in rows {
            questions.push(build_question(raw.map_err(store_err)?)?);
        }
        Ok(questions)
    }

    /// Conditionally stamp `last_notification_sent`, guarded on the value the
    /// tick observed. Returns false when another writer got there first — the
    /// caller must not count the slot as claimed.
    pub fn mark_question_sent(
        &self,
        question_id: i64,
        observed_last: Option<DateTime<Utc>>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE user_questions SET last_notification_sent = ?1
                 WHERE id = ?2
                   AND COALESCE(last_notification_sent, '') = COALESCE(?3, '')",
                rusqlite::params![fmt_ts(sent_at), question_id, observed_last.map(fmt_ts)],
            )
            .map_err(store_err)?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::temp_db;
    use chrono::NaiveTime;
    use nudge_core::types::User;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn new_q(user_id: i64, name: &str, is_default: bool) -> NewQuestion {
        NewQuestion {
            user_id,
            name: name.into(),
            text: format!("{name}?"),
            window_start: t(9, 0),
            window_end: t(22, 0),
            interval_minutes: 120,
            is_default,
        }
    }

    fn seed_user(db: &NudgeDb, id: i64) {
        db.upsert_user(&User::new(id, t(9, 0), t(22, 0), 60).unwrap())
            .unwrap();
    }

    #[test]
    fn test_duplicate_active_name_rejected() {
        let (db, dir) = temp_db("q-dup");
        seed_user(&db, 1);
        db.create_question(&new_q(1, "mood", false)).unwrap();
        assert!(db.create_question(&new_q(1, "mood", false)).is_err());
        // Same name is fine for a different user.
        seed_user(&db, 2);
        db.create_question(&new_q(2, "mood", false)).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_single_active_default() {
        let (db, dir) = temp_db("q-default");
        seed_user(&db, 1);
        let a = db.create_question(&new_q(1, "mood", true)).unwrap();
        let b = db.create_question(&new_q(1, "sleep", true)).unwrap();
        assert!(b.is_default);
        let a_after = db.get_question(a.id).unwrap().unwrap();
        assert!(!a_after.is_default);
        assert!(a_after.active);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_edit_creates_version_chain() {
        let (db, dir) = temp_db("q-edit");
        seed_user(&db, 1);
        let original = db.create_question(&new_q(1, "mood", false)).unwrap();

        let mut updated = new_q(1, "mood", false);
        updated.text = "How is your mood right now?".into();
        let successor = db.edit_question(original.id, &updated).unwrap();

        assert_eq!(successor.parent_question_id, Some(original.id));
        assert!(successor.active);
        assert_eq!(successor.text, "How is your mood right now?");

        let old = db.get_question(original.id).unwrap().unwrap();
        assert!(!old.active, "old version is deactivated, not deleted");

        let active = db.list_active_questions(1).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, successor.id);

        // Editing the already-superseded row fails.
        assert!(db.edit_question(original.id, &updated).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mark_sent_is_conditional() {
        let (db, dir) = temp_db("q-mark");
        seed_user(&db, 1);
        let q = db.create_question(&new_q(1, "mood", false)).unwrap();
        let now = Utc::now();

        assert!(db.mark_question_sent(q.id, None, now).unwrap());
        // A second claim against the stale observation loses.
        assert!(!db.mark_question_sent(q.id, None, now).unwrap());

        let fresh = db.get_question(q.id).unwrap().unwrap();
        let later = now + chrono::Duration::minutes(120);
        assert!(
            db.mark_question_sent(q.id, fresh.last_notification_sent, later)
                .unwrap()
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
