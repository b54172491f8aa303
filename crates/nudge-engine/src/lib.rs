//! The Nudge engine: scheduling, admission control, caching, delivery, and
//! fan-out, glued to the store and a message channel.
//!
//! Nothing in here talks to Telegram directly; delivery goes through the
//! `MessageChannel` trait so the whole engine runs against an in-memory
//! channel in tests.

pub mod broadcast;
pub mod cache;
pub mod dispatch;
pub mod inbound;
pub mod maintenance;
pub mod ratelimit;
pub mod scheduler;
pub mod settings;

pub use broadcast::BroadcastManager;
pub use cache::TtlCache;
pub use dispatch::Dispatcher;
pub use inbound::InboundRouter;
pub use maintenance::{run_sweep, spawn_maintenance};
pub use ratelimit::{Decision, RateLimiter};
pub use scheduler::{Scheduler, TickStats, is_due, spawn_scheduler, window_contains};
pub use settings::SettingsService;

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory channel used by the engine's unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;

    use nudge_core::MessageChannel;
    use nudge_core::types::SendError;

    pub struct MockChannel {
        next_id: AtomicI64,
        delay: Mutex<Option<std::time::Duration>>,
        failures: Mutex<HashMap<i64, SendError>>,
        sent: Mutex<Vec<(i64, String)>>,
    }

    impl MockChannel {
        pub fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1000),
                delay: Mutex::new(None),
                failures: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn fail_user(&self, chat_id: i64, error: SendError) {
            self.failures.lock().unwrap().insert(chat_id, error);
        }

        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
        }

        pub fn set_delay(&self, delay: std::time::Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| *id == chat_id)
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessageChannel for MockChannel {
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, SendError> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.failures.lock().unwrap().get(&chat_id) {
                return Err(error.clone());
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }
}
