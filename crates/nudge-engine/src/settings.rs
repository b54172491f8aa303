//! Cached read path for per-user settings and question lists.
//!
//! Reads go through the TTL cache so a scheduler tick over many users does
//! not hammer SQLite for rows that rarely change. Every write goes to the
//! store first and invalidates the affected keys before returning, so a read
//! issued after a successful write never sees the old value.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};

use nudge_core::error::Result;
use nudge_core::types::{NewQuestion, Question, User};
use nudge_store::NudgeDb;

use crate::cache::TtlCache;

pub struct SettingsService {
    db: Arc<NudgeDb>,
    users: TtlCache<Option<User>>,
    questions: TtlCache<Vec<Question>>,
    ttl: Duration,
}

fn user_key(tg_id: i64) -> String {
    format!("user:{tg_id}")
}

fn questions_key(user_id: i64) -> String {
    format!("questions:{user_id}")
}

impl SettingsService {
    pub fn new(db: Arc<NudgeDb>, max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            db,
            users: TtlCache::new(max_entries),
            questions: TtlCache::new(max_entries),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    pub fn get_user(&self, tg_id: i64) -> Result<Option<User>> {
        let key = user_key(tg_id);
        if let Some(cached) = self.users.get(&key) {
            return Ok(cached);
        }
        let user = self.db.get_user(tg_id)?;
        self.users.set(&key, user.clone(), self.ttl);
        Ok(user)
    }

    pub fn active_questions(&self, user_id: i64) -> Result<Vec<Question>> {
        let key = questions_key(user_id);
        if let Some(cached) = self.questions.get(&key) {
            return Ok(cached);
        }
        let questions = self.db.list_active_questions(user_id)?;
        self.questions.set(&key, questions.clone(), self.ttl);
        Ok(questions)
    }

    /// Update the user's schedule. Invalid settings never reach the store,
    /// and the stale cache entry is gone before the caller sees success.
    pub fn update_user_settings(
        &self,
        tg_id: i64,
        window_start: NaiveTime,
        window_end: NaiveTime,
        interval_minutes: i64,
    ) -> Result<()> {
        self.db
            .update_user_settings(tg_id, window_start, window_end, interval_minutes)?;
        self.users.invalidate(&user_key(tg_id));
        Ok(())
    }

    pub fn set_user_enabled(&self, tg_id: i64, enabled: bool) -> Result<()> {
        self.db.set_user_enabled(tg_id, enabled)?;
        self.invalidate_user(tg_id);
        Ok(())
    }

    pub fn create_question(&self, new: &NewQuestion) -> Result<Question> {
        let created = self.db.create_question(new)?;
        self.questions.invalidate(&questions_key(new.user_id));
        Ok(created)
    }

    pub fn edit_question(&self, question_id: i64, updated: &NewQuestion) -> Result<Question> {
        let successor = self.db.edit_question(question_id, updated)?;
        self.questions.invalidate(&questions_key(updated.user_id));
        Ok(successor)
    }

    pub fn deactivate_question(&self, user_id: i64, question_id: i64) -> Result<()> {
        self.db.deactivate_question(question_id)?;
        self.questions.invalidate(&questions_key(user_id));
        Ok(())
    }

    /// Drop the cached question list for one user. The scheduler calls this
    /// after stamping a send so the next tick reads fresh send times.
    pub fn invalidate_questions(&self, user_id: i64) {
        self.questions.invalidate(&questions_key(user_id));
    }

    /// Drop every cached entry for one user. Both caches key as `kind:id`,
    /// so one suffix pattern covers them.
    pub fn invalidate_user(&self, tg_id: i64) {
        let pattern = format!("*:{tg_id}");
        self.users.invalidate_pattern(&pattern);
        self.questions.invalidate_pattern(&pattern);
    }

    /// Reclaim expired entries from both caches.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        self.users.sweep(now) + self.questions.sweep(now)
    }
}
