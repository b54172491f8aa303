//! Generic expiring key/value cache for slowly-changing per-user data.
//!
//! Sharded so unrelated keys never serialize behind one lock. Expired
//! entries read as misses immediately; the periodic sweep only reclaims
//! memory. When a shard fills up, the entry with the lowest hit count
//! (oldest on ties) is evicted, which approximates LRU without tracking
//! recency per access.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

const SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
    hit_count: u64,
    created_at: DateTime<Utc>,
}

pub struct TtlCache<V> {
    shards: Vec<Mutex<HashMap<String, Entry<V>>>>,
    /// Per-shard capacity; total capacity is spread across shards.
    shard_capacity: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_entries: usize) -> Self {
        let shard_capacity = max_entries.div_ceil(SHARDS).max(1);
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            shard_capacity,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Entry<V>>> {
        use std::hash::{DefaultHasher, Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let mut shard = self.shard(key).lock().ok()?;
        match shard.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.hit_count += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                // Expired: a miss, reclaimed here rather than waiting for
                // the sweep.
                shard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.set_at(key, value, ttl, Utc::now());
    }

    pub fn set_at(&self, key: &str, value: V, ttl: Duration, now: DateTime<Utc>) {
        let Ok(mut shard) = self.shard(key).lock() else {
            return;
        };
        if shard.len() >= self.shard_capacity && !shard.contains_key(key) {
            evict_one(&mut shard);
        }
        shard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                hit_count: 0,
                created_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut shard) = self.shard(key).lock() {
            shard.remove(key);
        }
    }

    /// Remove every key matching a glob pattern (`*` matches any run of
    /// characters).
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            if let Ok(mut shard) = shard.lock() {
                let before = shard.len();
                shard.retain(|key, _| !glob_match(pattern, key));
                removed += before - shard.len();
            }
        }
        removed
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            if let Ok(mut shard) = shard.lock() {
                let before = shard.len();
                shard.retain(|_, entry| entry.expires_at > now);
                removed += before - shard.len();
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map(|s| s.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_one<V>(shard: &mut HashMap<String, Entry<V>>) {
    let victim = shard
        .iter()
        .min_by_key(|(_, e)| (e.hit_count, e.created_at))
        .map(|(k, _)| k.clone());
    if let Some(key) = victim {
        shard.remove(&key);
    }
}

/// Minimal glob: literal characters plus `*` for any (possibly empty) run.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    // Classic two-pointer wildcard match with backtracking on the last star.
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);
    while t < txt.len() {
        if p < pat.len() && (pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_and_expiry_is_miss() {
        let cache: TtlCache<String> = TtlCache::new(100);
        let now = Utc::now();
        cache.set_at("user:1", "settings".into(), Duration::seconds(60), now);

        assert_eq!(
            cache.get_at("user:1", now + Duration::seconds(59)),
            Some("settings".into())
        );
        // At/after expiry the entry reads as a miss even though no sweep ran.
        assert_eq!(cache.get_at("user:1", now + Duration::seconds(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_pattern() {
        let cache: TtlCache<i32> = TtlCache::new(100);
        let now = Utc::now();
        cache.set_at("user:1", 1, Duration::seconds(60), now);
        cache.set_at("user:2", 2, Duration::seconds(60), now);
        cache.set_at("questions:1", 3, Duration::seconds(60), now);

        cache.invalidate("user:1");
        assert_eq!(cache.get_at("user:1", now), None);

        assert_eq!(cache.invalidate_pattern("questions:*"), 1);
        assert_eq!(cache.get_at("questions:1", now), None);
        assert_eq!(cache.get_at("user:2", now), Some(2));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache: TtlCache<i32> = TtlCache::new(100);
        let now = Utc::now();
        cache.set_at("a", 1, Duration::seconds(10), now);
        cache.set_at("b", 2, Duration::seconds(100), now);

        assert_eq!(cache.sweep(now + Duration::seconds(50)), 1);
        assert_eq!(cache.get_at("b", now + Duration::seconds(50)), Some(2));
    }

    #[test]
    fn test_eviction_prefers_cold_entries() {
        // Two-slot shards: every insert past the second in a shard must
        // evict, and the victim is always the 0-hit newcomer's peer, never
        // the entry with hits.
        let cache: TtlCache<i32> = TtlCache::new(32);
        let now = Utc::now();
        cache.set_at("hot", 1, Duration::seconds(60), now);
        cache.get_at("hot", now);
        cache.get_at("hot", now);

        // Fill far past capacity; "hot" has hits, fresh entries have none.
        for i in 0..50 {
            cache.set_at(&format!("cold:{i}"), i, Duration::seconds(60), now);
        }
        assert_eq!(cache.get_at("hot", now), Some(1));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("user:*", "user:123"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("user:*:questions", "user:9:questions"));
        assert!(!glob_match("user:*", "questions:1"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
