//! Single-message delivery with a bounded wait.
//!
//! Failure is data here: `send` always returns a `SendOutcome` and never an
//! error, so callers fold delivery failures into their own accounting instead
//! of unwinding. No retries either; the scheduler's next tick and broadcast
//! reporting are the retry policy.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use nudge_core::types::{SendError, SendOutcome};
use nudge_core::MessageChannel;
use nudge_store::NudgeDb;

pub struct Dispatcher {
    channel: Arc<dyn MessageChannel>,
    db: Arc<NudgeDb>,
    send_timeout: StdDuration,
    correlation_ttl: Duration,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        db: Arc<NudgeDb>,
        send_timeout_secs: u64,
        correlation_ttl_days: i64,
    ) -> Self {
        Self {
            channel,
            db,
            send_timeout: StdDuration::from_secs(send_timeout_secs),
            correlation_ttl: Duration::days(correlation_ttl_days),
        }
    }

    /// Deliver `text` to a user. When `correlate_as` names a question, a
    /// successful send is recorded so a later reply to the outbound message
    /// can be attributed to that question.
    pub async fn send(&self, user_id: i64, text: &str, correlate_as: Option<i64>) -> SendOutcome {
        let attempt = self.channel.send_message(user_id, text);
        let result = match tokio::time::timeout(self.send_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("⏱️ Send to user {user_id} exceeded bounded wait");
                return SendOutcome::failed(SendError::Timeout);
            }
        };

        match result {
            Ok(message_id) => {
                if let Some(question_id) = correlate_as {
                    // The message is already out; a correlation write failure
                    // only loses attribution for the eventual reply.
                    if let Err(e) = self.db.record_notification(
                        user_id,
                        question_id,
                        message_id,
                        Utc::now(),
                        self.correlation_ttl,
                    ) {
                        tracing::error!(
                            "Failed to record correlation for user {user_id} question {question_id}: {e}"
                        );
                    }
                }
                SendOutcome::ok(message_id)
            }
            Err(error) => {
                if error.is_permanent() {
                    tracing::warn!("🚫 Permanent delivery failure for user {user_id}: {error}");
                } else {
                    tracing::warn!("📨 Delivery failure for user {user_id}: {error}");
                }
                SendOutcome::failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use nudge_store::test_util::temp_db;

    #[tokio::test]
    async fn test_success_returns_message_id_and_correlates() {
        let (db, dir) = temp_db("dispatch-ok");
        let db = Arc::new(db);
        let channel = Arc::new(MockChannel::new());
        let dispatcher = Dispatcher::new(channel.clone(), db.clone(), 30, 90);

        let outcome = dispatcher.send(5, "How did you sleep?", Some(42)).await;
        assert!(outcome.success);
        let message_id = outcome.outbound_message_id.unwrap();
        assert!(outcome.error.is_none());

        let resolved = db.resolve_notification(5, message_id, Utc::now()).unwrap();
        assert_eq!(resolved, Some(42));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_failure_is_outcome_not_error() {
        let (db, dir) = temp_db("dispatch-fail");
        let channel = MockChannel::new();
        channel.fail_user(9, SendError::Blocked);
        let dispatcher = Dispatcher::new(Arc::new(channel), Arc::new(db), 30, 90);

        let outcome = dispatcher.send(9, "hello", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.outbound_message_id, None);
        assert_eq!(outcome.error, Some(SendError::Blocked));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_bounded_wait_yields_timeout_outcome() {
        let (db, dir) = temp_db("dispatch-timeout");
        let channel = MockChannel::new();
        channel.set_delay(StdDuration::from_secs(5));
        // 0-second bound forces the timeout path without a slow test.
        let dispatcher = Dispatcher::new(Arc::new(channel), Arc::new(db), 0, 90);

        let outcome = dispatcher.send(1, "hello", None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error, Some(SendError::Timeout));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_no_correlation_recorded_without_question() {
        let (db, dir) = temp_db("dispatch-nocorr");
        let db = Arc::new(db);
        let dispatcher = Dispatcher::new(Arc::new(MockChannel::new()), db.clone(), 30, 90);

        let outcome = dispatcher.send(5, "broadcast text", None).await;
        let message_id = outcome.outbound_message_id.unwrap();
        assert_eq!(db.resolve_notification(5, message_id, Utc::now()).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
