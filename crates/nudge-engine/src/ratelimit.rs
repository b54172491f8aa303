//! Sliding-window rate limiter keyed by (user, action class).
//!
//! Each key owns its own bucket behind its own mutex. The outer map lock is
//! only held long enough to find or insert the bucket, so a burst from one
//! user never stalls checks for another. Lock order: the map lock is always
//! released before a bucket lock is taken.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use nudge_core::types::ActionClass;

/// How long a bucket may sit untouched before eviction reclaims it.
const IDLE_EVICTION_HOURS: i64 = 24;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Seconds until the oldest counted hit ages out. Only set on denial.
    pub retry_after_seconds: Option<u64>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
        }
    }

    fn deny(retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    hits: VecDeque<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
}

pub struct RateLimiter {
    buckets: RwLock<HashMap<(i64, ActionClass), Arc<Mutex<Bucket>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether an action is admitted right now. An allowed check counts
    /// against the window; a denied check does not.
    pub fn check(&self, user_id: i64, class: ActionClass) -> Decision {
        self.check_at(user_id, class, Utc::now())
    }

    pub fn check_at(&self, user_id: i64, class: ActionClass, now: DateTime<Utc>) -> Decision {
        let bucket = self.bucket(user_id, class);
        let Ok(mut bucket) = bucket.lock() else {
            // A poisoned bucket fails closed, for its own key only.
            return Decision::deny(1);
        };
        bucket.last_activity = now;

        let (max_actions, window_seconds) = class.limit();
        let window = Duration::seconds(window_seconds as i64);
        let cutoff = now - window;
        while bucket.hits.front().is_some_and(|hit| *hit <= cutoff) {
            bucket.hits.pop_front();
        }

        if bucket.hits.len() < max_actions {
            bucket.hits.push_back(now);
            return Decision::allow();
        }

        let retry_after = bucket
            .hits
            .front()
            .map(|oldest| (*oldest + window - now).num_seconds().max(0) as u64)
            .unwrap_or(0);
        tracing::debug!(
            "🚦 Rate limit hit for user {user_id} ({}) — retry in {retry_after}s",
            class.as_str()
        );
        Decision::deny(retry_after)
    }

    fn bucket(&self, user_id: i64, class: ActionClass) -> Arc<Mutex<Bucket>> {
        let key = (user_id, class);
        if let Ok(buckets) = self.buckets.read() {
            if let Some(bucket) = buckets.get(&key) {
                return Arc::clone(bucket);
            }
        }
        let mut buckets = match self.buckets.write() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(buckets.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                hits: VecDeque::new(),
                last_activity: Utc::now(),
            }))
        }))
    }

    /// Drop buckets idle for 24h or more. Returns how many were removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(IDLE_EVICTION_HOURS);
        let mut buckets = match self.buckets.write() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket
                .lock()
                .map(|b| b.last_activity > cutoff)
                .unwrap_or(false)
        });
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().map(|b| b.len()).unwrap_or(0)
    }
}
