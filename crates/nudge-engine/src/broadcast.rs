//! Fan-out of one message to every enabled user.
//!
//! Users are fetched in pages, split into fixed-size batches, and sent with
//! bounded concurrency. Per-message failures are data from the dispatcher, so
//! one blocked user never aborts the run; every recipient lands in exactly
//! one of the success or failure counters.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::Semaphore;

use nudge_core::config::BroadcastConfig;
use nudge_core::error::Result;
use nudge_core::types::{BroadcastProgress, BroadcastResult};
use nudge_store::NudgeDb;

use crate::dispatch::Dispatcher;

pub struct BroadcastManager {
    db: Arc<NudgeDb>,
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
    max_concurrent_batches: usize,
    batch_delay: StdDuration,
    fetch_page_size: usize,
}

impl BroadcastManager {
    pub fn new(db: Arc<NudgeDb>, dispatcher: Arc<Dispatcher>, config: &BroadcastConfig) -> Self {
        Self {
            db,
            dispatcher,
            batch_size: config.batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            batch_delay: StdDuration::from_millis(config.batch_delay_ms),
            fetch_page_size: config.fetch_page_size.max(1),
        }
    }

    /// Send `text` to every enabled user. The progress callback fires with
    /// cumulative counts after each batch finishes; batches complete out of
    /// order, so counts grow monotonically but in completion order.
    pub async fn send_broadcast<F>(&self, text: &str, mut progress: F) -> Result<BroadcastResult>
    where
        F: FnMut(BroadcastProgress) + Send,
    {
        let recipients = self.fetch_recipients()?;
        let total = recipients.len();
        if total == 0 {
            tracing::info!("📣 Broadcast skipped: no enabled users");
            return Ok(BroadcastResult::new(0, 0, 0));
        }
        tracing::info!(
            "📣 Broadcast starting: {total} recipients in batches of {}",
            self.batch_size
        );

        let text: Arc<str> = Arc::from(text);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_batches));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(usize, usize)>();

        for batch in recipients.chunks(self.batch_size) {
            let batch = batch.to_vec();
            let text = Arc::clone(&text);
            let dispatcher = Arc::clone(&self.dispatcher);
            let semaphore = Arc::clone(&semaphore);
            let batch_delay = self.batch_delay;
            let tx = tx.clone();

            tokio::spawn(async move {
                // Closed semaphore is unreachable; treat it as an empty batch.
                let Ok(_permit) = semaphore.acquire().await else {
                    let _ = tx.send((0, batch.len()));
                    return;
                };
                let sends = batch
                    .iter()
                    .map(|user_id| dispatcher.send(*user_id, &text, None));
                let outcomes = futures::future::join_all(sends).await;
                let ok = outcomes.iter().filter(|o| o.success).count();

                // Pace the platform: hold the permit through the delay so a
                // finished batch does not immediately free a slot.
                tokio::time::sleep(batch_delay).await;
                let _ = tx.send((ok, batch.len() - ok));
            });
        }
        drop(tx);

        let (mut successful, mut failed) = (0usize, 0usize);
        while let Some((ok, bad)) = rx.recv().await {
            successful += ok;
            failed += bad;
            progress(BroadcastProgress {
                total,
                successful,
                failed,
            });
        }

        let result = BroadcastResult::new(total, successful, failed);
        tracing::info!(
            "📣 Broadcast complete: {}/{} delivered, {} failed ({:.1}% delivery)",
            result.successful,
            result.total,
            result.failed,
            result.delivery_rate * 100.0
        );
        Ok(result)
    }

    fn fetch_recipients(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.db.list_enabled_users(self.fetch_page_size, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            ids.extend(page.into_iter().map(|u| u.tg_id));
        }
        Ok(ids)
    }
}
