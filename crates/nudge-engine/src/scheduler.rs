//! Periodic evaluation of who is owed a check-in question.
//!
//! One tick walks enabled users in pages, evaluates each active question
//! against its daily window and minimum interval, and hands due questions to
//! the dispatcher. Ticks are awaited inline by the driver loop, so they never
//! overlap; a slow tick delays the next one instead of running beside it.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::time::MissedTickBehavior;

use nudge_core::types::Question;
use nudge_store::NudgeDb;

use crate::dispatch::Dispatcher;
use crate::settings::SettingsService;

/// Whether time-of-day `t` falls inside the daily window. Start is inclusive,
/// end exclusive. A window with `start > end` wraps midnight: 22:00 to 02:00
/// covers 23:00 and 01:00 but not 12:00.
pub fn window_contains(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if start < end {
        t >= start && t < end
    } else {
        t >= start || t < end
    }
}

/// Whether a question is owed a notification at `now`: inside its window and
/// at least `interval_minutes` since the last send (never-sent counts as due).
pub fn is_due(question: &Question, now: DateTime<Utc>) -> bool {
    if !window_contains(question.window_start, question.window_end, now.time()) {
        return false;
    }
    match question.last_notification_sent {
        Some(last) => now - last >= Duration::minutes(question.interval_minutes),
        None => true,
    }
}

/// Counters for one tick, logged by the driver loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub evaluated: usize,
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct Scheduler {
    db: Arc<NudgeDb>,
    settings: Arc<SettingsService>,
    dispatcher: Arc<Dispatcher>,
    page_size: usize,
}

impl Scheduler {
    pub fn new(
        db: Arc<NudgeDb>,
        settings: Arc<SettingsService>,
        dispatcher: Arc<Dispatcher>,
        page_size: usize,
    ) -> Self {
        Self {
            db,
            settings,
            dispatcher,
            page_size,
        }
    }

    /// Evaluate every enabled user's active questions at `now`. A failure for
    /// one user never stops the walk; it lands in the stats and the log.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickStats {
        let mut stats = TickStats::default();
        let mut offset = 0;

        loop {
            let users = match self.db.list_enabled_users(self.page_size, offset) {
                Ok(users) => users,
                Err(e) => {
                    tracing::error!("Scheduler tick aborted: user page failed: {e}");
                    break;
                }
            };
            if users.is_empty() {
                break;
            }
            offset += users.len();

            for user in &users {
                let questions = match self.settings.active_questions(user.tg_id) {
                    Ok(questions) => questions,
                    Err(e) => {
                        tracing::warn!("Skipping user {}: question load failed: {e}", user.tg_id);
                        continue;
                    }
                };

                for question in &questions {
                    stats.evaluated += 1;
                    if !is_due(question, now) {
                        continue;
                    }
                    stats.due += 1;
                    self.deliver(question, now, &mut stats).await;
                }
            }
        }

        stats
    }

    async fn deliver(&self, question: &Question, now: DateTime<Utc>, stats: &mut TickStats) {
        let outcome = self
            .dispatcher
            .send(question.user_id, &question.text, Some(question.id))
            .await;

        if !outcome.success {
            stats.failed += 1;
            return;
        }
        stats.sent += 1;

        // Stamp the send conditionally on the send time we evaluated against.
        // A lost race means another writer already stamped; the send itself
        // still happened, so it stays counted.
        match self
            .db
            .mark_question_sent(question.id, question.last_notification_sent, now)
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Question {} was stamped concurrently; skipping our stamp",
                    question.id
                );
            }
            Err(e) => {
                tracing::error!("Failed to stamp send for question {}: {e}", question.id);
            }
        }
        // User-level bookkeeping is informational (per-question stamps gate
        // the schedule), so it is unconditional.
        if let Err(e) = self.db.set_user_last_sent(question.user_id, now) {
            tracing::warn!("Failed to stamp user {} last-sent: {e}", question.user_id);
        }
        self.settings.invalidate_questions(question.user_id);
    }
}

/// Drive the scheduler on a fixed cadence. Missed ticks are delayed, not
/// bunched, so a stall never causes a burst of back-to-back ticks.
pub fn spawn_scheduler(scheduler: Arc<Scheduler>, tick_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("⏰ Scheduler started (tick every {tick_secs}s)");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(tick_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let stats = scheduler.tick(Utc::now()).await;
            if stats.sent > 0 || stats.failed > 0 {
                tracing::info!(
                    "📬 Tick: {} evaluated, {} due, {} sent, {} failed",
                    stats.evaluated,
                    stats.due,
                    stats.sent,
                    stats.failed
                );
            }
        }
    })
}
