//! Routing for messages users send to the bot.
//!
//! Every inbound message passes admission control first. Replies to an
//! earlier notification are attributed to the question that prompted them
//! via the correlation store; anything unmatched is still logged, just
//! without attribution. The broadcast command is gated to the configured
//! administrator chat.

use std::sync::Arc;

use chrono::Utc;

use nudge_core::error::Result;
use nudge_core::types::{ActionClass, Activity, Inbound};
use nudge_store::NudgeDb;

use crate::broadcast::BroadcastManager;
use crate::dispatch::Dispatcher;
use crate::ratelimit::RateLimiter;

const BROADCAST_CMD: &str = "/broadcast";

pub struct InboundRouter {
    db: Arc<NudgeDb>,
    limiter: Arc<RateLimiter>,
    dispatcher: Arc<Dispatcher>,
    broadcast: Arc<BroadcastManager>,
    admin_chat_id: i64,
}

impl InboundRouter {
    pub fn new(
        db: Arc<NudgeDb>,
        limiter: Arc<RateLimiter>,
        dispatcher: Arc<Dispatcher>,
        broadcast: Arc<BroadcastManager>,
        admin_chat_id: i64,
    ) -> Self {
        Self {
            db,
            limiter,
            dispatcher,
            broadcast,
            admin_chat_id,
        }
    }

    /// Handle one inbound message end to end. Store failures bubble up so
    /// the caller can log them; delivery failures are already data.
    pub async fn handle(&self, inbound: &Inbound) -> Result<()> {
        let is_admin_broadcast =
            inbound.text.starts_with(BROADCAST_CMD) && inbound.user_id == self.admin_chat_id;
        let class = if is_admin_broadcast {
            ActionClass::Admin
        } else {
            ActionClass::General
        };

        let decision = self.limiter.check(inbound.user_id, class);
        if !decision.allowed {
            let wait = decision.retry_after_seconds.unwrap_or(1);
            self.dispatcher
                .send(
                    inbound.user_id,
                    &format!("⏳ Too many messages. Try again in {wait}s."),
                    None,
                )
                .await;
            return Ok(());
        }

        if let Some(rest) = inbound.text.strip_prefix(BROADCAST_CMD) {
            return self.handle_broadcast(inbound.user_id, rest.trim()).await;
        }
        self.handle_reply(inbound).await
    }

    async fn handle_reply(&self, inbound: &Inbound) -> Result<()> {
        let now = Utc::now();
        let question_id = match inbound.in_reply_to_message_id {
            Some(message_id) => self
                .db
                .resolve_notification(inbound.user_id, message_id, now)?,
            None => None,
        };

        self.db.log_activity(&Activity {
            user_id: inbound.user_id,
            question_id,
            text: inbound.text.clone(),
            timestamp: now,
        })?;

        let ack = if question_id.is_some() {
            "✅ Got it, logged against your check-in."
        } else {
            "✅ Noted."
        };
        self.dispatcher.send(inbound.user_id, ack, None).await;
        Ok(())
    }

    async fn handle_broadcast(&self, user_id: i64, text: &str) -> Result<()> {
        if user_id != self.admin_chat_id {
            tracing::warn!("Broadcast attempt from non-admin user {user_id}");
            self.dispatcher
                .send(user_id, "This command is restricted.", None)
                .await;
            return Ok(());
        }
        if text.is_empty() {
            self.dispatcher
                .send(user_id, "Usage: /broadcast <message>", None)
                .await;
            return Ok(());
        }

        let result = self
            .broadcast
            .send_broadcast(text, |p| {
                tracing::info!(
                    "📣 Broadcast progress: {}/{} delivered, {} failed",
                    p.successful,
                    p.total,
                    p.failed
                );
            })
            .await?;

        self.dispatcher
            .send(
                user_id,
                &format!(
                    "📣 Broadcast done: {}/{} delivered, {} failed ({:.1}% delivery)",
                    result.successful,
                    result.total,
                    result.failed,
                    result.delivery_rate * 100.0
                ),
                None,
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use chrono::{Duration, NaiveTime};
    use nudge_core::config::BroadcastConfig;
    use nudge_core::types::{NewQuestion, User};
    use nudge_store::test_util::temp_db;

    const ADMIN: i64 = 99;

    fn seed_user(db: &NudgeDb, tg_id: i64) {
        let ws = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let we = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        db.upsert_user(&User::new(tg_id, ws, we, 60).unwrap()).unwrap();
    }

    fn seed_question(db: &NudgeDb, user_id: i64) -> i64 {
        let ws = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let we = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        db.create_question(&NewQuestion {
            user_id,
            name: "mood".into(),
            text: "How are you feeling?".into(),
            window_start: ws,
            window_end: we,
            interval_minutes: 60,
            is_default: true,
        })
        .unwrap()
        .id
    }

    fn build(db: Arc<NudgeDb>, channel: Arc<MockChannel>) -> InboundRouter {
        let dispatcher = Arc::new(Dispatcher::new(channel, db.clone(), 30, 90));
        let broadcast = Arc::new(BroadcastManager::new(
            db.clone(),
            dispatcher.clone(),
            &BroadcastConfig {
                batch_size: 10,
                max_concurrent_batches: 5,
                batch_delay_ms: 0,
                send_timeout_secs: 30,
                fetch_page_size: 100,
            },
        ));
        InboundRouter::new(
            db,
            Arc::new(RateLimiter::new()),
            dispatcher,
            broadcast,
            ADMIN,
        )
    }

    fn inbound(user_id: i64, text: &str, reply_to: Option<i64>) -> Inbound {
        Inbound {
            user_id,
            text: text.into(),
            in_reply_to_message_id: reply_to,
        }
    }

    #[tokio::test]
    async fn test_reply_attributed_to_question() {
        let (db, dir) = temp_db("inbound-reply");
        let db = Arc::new(db);
        seed_user(&db, 1);
        let question_id = seed_question(&db, 1);
        db.record_notification(1, question_id, 700, Utc::now(), Duration::days(90))
            .unwrap();

        let channel = Arc::new(MockChannel::new());
        let router = build(db.clone(), channel);

        router.handle(&inbound(1, "slept great", Some(700))).await.unwrap();

        let log = db.recent_activity(1, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].question_id, Some(question_id));
        assert_eq!(log[0].text, "slept great");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_expired_correlation_logs_unattributed() {
        let (db, dir) = temp_db("inbound-expired");
        let db = Arc::new(db);
        seed_user(&db, 1);
        let question_id = seed_question(&db, 1);
        // Sent two hours ago with a one-hour TTL: expired but not yet swept.
        db.record_notification(
            1,
            question_id,
            700,
            Utc::now() - Duration::hours(2),
            Duration::hours(1),
        )
        .unwrap();

        let channel = Arc::new(MockChannel::new());
        let router = build(db.clone(), channel);

        router.handle(&inbound(1, "late answer", Some(700))).await.unwrap();

        let log = db.recent_activity(1, 10).unwrap();
        assert_eq!(log[0].question_id, None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_throttled_user_gets_retry_notice_and_nothing_logged() {
        let (db, dir) = temp_db("inbound-throttle");
        let db = Arc::new(db);
        seed_user(&db, 1);

        let channel = Arc::new(MockChannel::new());
        let router = build(db.clone(), channel.clone());

        // General class admits 20 per minute.
        for i in 0..20 {
            router.handle(&inbound(1, &format!("msg {i}"), None)).await.unwrap();
        }
        router.handle(&inbound(1, "one too many", None)).await.unwrap();

        assert_eq!(db.recent_activity(1, 50).unwrap().len(), 20);
        let replies = channel.sent_to(1);
        assert!(replies.last().unwrap().contains("Try again in"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_broadcast_restricted_to_admin() {
        let (db, dir) = temp_db("inbound-bcast-gate");
        let db = Arc::new(db);
        seed_user(&db, 1);
        seed_user(&db, 2);

        let channel = Arc::new(MockChannel::new());
        let router = build(db.clone(), channel.clone());

        router.handle(&inbound(1, "/broadcast pwned", None)).await.unwrap();

        assert!(channel.sent_to(1).last().unwrap().contains("restricted"));
        assert!(channel.sent_to(2).is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_admin_broadcast_reaches_enabled_users() {
        let (db, dir) = temp_db("inbound-bcast-run");
        let db = Arc::new(db);
        seed_user(&db, 1);
        seed_user(&db, 2);
        seed_user(&db, 3);

        let channel = Arc::new(MockChannel::new());
        let router = build(db.clone(), channel.clone());

        router
            .handle(&inbound(ADMIN, "/broadcast Server restart at 22:00", None))
            .await
            .unwrap();

        for user in 1..=3 {
            assert_eq!(channel.sent_to(user), vec!["Server restart at 22:00"]);
        }
        assert!(channel.sent_to(ADMIN).last().unwrap().contains("3/3 delivered"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
