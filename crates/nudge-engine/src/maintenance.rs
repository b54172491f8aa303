//! Periodic housekeeping: expired correlation records, cache entries, and
//! idle rate-limit buckets all age out on one cadence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use nudge_store::NudgeDb;

use crate::ratelimit::RateLimiter;
use crate::settings::SettingsService;

/// Counts of what one sweep reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub correlations: usize,
    pub cache_entries: usize,
    pub rate_buckets: usize,
}

/// One housekeeping pass. Safe to run at any time; sweeping is only a
/// memory/disk reclaim, expiry itself is enforced at read time.
pub fn run_sweep(
    db: &NudgeDb,
    settings: &SettingsService,
    limiter: &RateLimiter,
    now: DateTime<Utc>,
) -> SweepStats {
    let correlations = match db.sweep_notifications(now) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("Correlation sweep failed: {e}");
            0
        }
    };
    let stats = SweepStats {
        correlations,
        cache_entries: settings.sweep(now),
        rate_buckets: limiter.evict_idle(now),
    };
    if stats.correlations > 0 || stats.cache_entries > 0 || stats.rate_buckets > 0 {
        tracing::debug!(
            "🧹 Sweep reclaimed {} correlations, {} cache entries, {} rate buckets",
            stats.correlations,
            stats.cache_entries,
            stats.rate_buckets
        );
    }
    stats
}

/// Run the sweep on a fixed cadence in the background.
pub fn spawn_maintenance(
    db: Arc<NudgeDb>,
    settings: Arc<SettingsService>,
    limiter: Arc<RateLimiter>,
    sweep_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("🧹 Maintenance sweep started (every {sweep_secs}s)");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_sweep(&db, &settings, &limiter, Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};
    use nudge_core::types::{ActionClass, NewQuestion, User};
    use nudge_store::test_util::temp_db;

    #[test]
    fn test_sweep_reclaims_all_three_stores() {
        let (db, dir) = temp_db("maint");
        let ws = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let we = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        db.upsert_user(&User::new(1, ws, we, 60).unwrap()).unwrap();
        let question = db
            .create_question(&NewQuestion {
                user_id: 1,
                name: "mood".into(),
                text: "How are you feeling?".into(),
                window_start: ws,
                window_end: we,
                interval_minutes: 60,
                is_default: true,
            })
            .unwrap();

        let now = Utc::now();
        // One correlation already expired, one still live.
        db.record_notification(1, question.id, 700, now - Duration::days(91), Duration::days(90))
            .unwrap();
        db.record_notification(1, question.id, 701, now, Duration::days(90))
            .unwrap();

        let db = Arc::new(db);
        let settings = SettingsService::new(db.clone(), 100, 300);
        settings.get_user(1).unwrap();

        let limiter = RateLimiter::new();
        limiter.check_at(1, ActionClass::General, now - Duration::hours(30));

        let stats = run_sweep(&db, &settings, &limiter, now + Duration::seconds(301));
        assert_eq!(stats.correlations, 1);
        assert_eq!(stats.cache_entries, 1);
        assert_eq!(stats.rate_buckets, 1);

        // The live correlation still resolves after the sweep.
        assert_eq!(db.resolve_notification(1, 701, now).unwrap(), Some(question.id));
        std::fs::remove_dir_all(&dir).ok();
    }
}
