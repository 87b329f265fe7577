//! Response cache with per-entry expiration.
//!
//! Entries are keyed by a [`CacheKey`] fingerprint of the request URL and its
//! sorted parameters. An entry is expired once strictly more than its TTL has
//! elapsed since it was stored (or last touched); expired entries are never
//! returned and are purged lazily on the next read or by
//! [`ResponseCache::cleanup_expired`].
//!
//! Error payloads (`result: "error"`) are never stored, so a transient failure
//! cannot be replayed from the cache.

use crate::error::is_error_payload;
use crate::request::Params;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Deterministic fingerprint of a request.
///
/// Parameters are sorted by key before the key is built, so insertion order
/// never affects cacheability.
///
/// ```
/// use cocapi::cache::CacheKey;
/// use cocapi::request::Params;
///
/// let mut a = Params::new();
/// a.insert("limit".into(), "5".into());
/// a.insert("after".into(), "abc".into());
///
/// let mut b = Params::new();
/// b.insert("after".into(), "abc".into());
/// b.insert("limit".into(), "5".into());
///
/// assert_eq!(CacheKey::new("/clans", &a), CacheKey::new("/clans", &b));
/// assert_eq!(CacheKey::new("/clans", &a).as_str(), "/clans?after=abc&limit=5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for a request URL (or path) and its parameters.
    pub fn new(url: &str, params: &Params) -> Self {
        if params.is_empty() {
            return CacheKey(url.to_string());
        }

        let mut pairs: Vec<(&String, &String)> = params.iter().collect();
        pairs.sort();

        let query = pairs
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");

        CacheKey(format!("{}?{}", url, query))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    fn info(&self, key: &CacheKey, now: Instant) -> CacheEntryInfo {
        let age = now.saturating_duration_since(self.created_at).as_secs_f64();
        let ttl = self.ttl.as_secs_f64();
        CacheEntryInfo {
            key: key.to_string(),
            ttl_secs: ttl,
            age_secs: age,
            expires_in_secs: ttl - age,
            is_expired: self.is_expired(now),
            size_estimate: size_estimate(&self.data),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    evictions: u64,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    default_ttl: Duration,
    counters: Counters,
}

/// Snapshot of cache counters and occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub total_entries: usize,
    pub valid_entries: usize,
    /// Expired entries that have not been purged yet
    pub expired_entries: usize,
    pub default_ttl_secs: f64,
    /// Hits as a percentage of lookups, rounded to two decimals
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
}

/// Description of a single cache entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
    pub key: String,
    pub ttl_secs: f64,
    pub age_secs: f64,
    /// Negative once the entry has expired
    pub expires_in_secs: f64,
    pub is_expired: bool,
    /// Length of the entry's JSON serialization
    pub size_estimate: usize,
}

/// Every entry, soonest to expire first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub entries: Vec<CacheEntryInfo>,
    pub size_estimate: usize,
}

/// In-memory response cache owned by one client.
///
/// All operations lock a single mutex, so a read or write of one key never
/// observes a partially written entry.
#[derive(Debug)]
pub struct ResponseCache {
    enabled: AtomicBool,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// Creates an enabled cache with the given default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                default_ttl,
                counters: Counters::default(),
            }),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Returns the cached payload if present and not expired.
    ///
    /// An expired entry is removed as a side effect. A disabled cache reports
    /// every key absent without touching its storage.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        let mut state = self.lock();

        let expired = state.entries.get(key).map(|entry| entry.is_expired(now));
        match expired {
            Some(false) => {
                state.counters.hits += 1;
                state.entries.get(key).map(|entry| entry.data.clone())
            }
            Some(true) => {
                state.entries.remove(key);
                state.counters.evictions += 1;
                state.counters.misses += 1;
                None
            }
            None => {
                state.counters.misses += 1;
                None
            }
        }
    }

    /// Stores a payload with the given TTL, or the default TTL when `None`.
    ///
    /// Returns `false` without storing anything if the cache is disabled or the
    /// payload is an error payload.
    pub fn set(&self, key: CacheKey, data: Value, ttl: Option<Duration>) -> bool {
        if !self.is_enabled() || is_error_payload(&data) {
            return false;
        }

        let mut state = self.lock();
        let ttl = ttl.unwrap_or(state.default_ttl);
        state.entries.insert(
            key,
            CacheEntry {
                data,
                created_at: Instant::now(),
                ttl,
            },
        );
        state.counters.sets += 1;
        true
    }

    /// Removes one entry. Returns `false` if it was not present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.lock();
        if state.entries.remove(key).is_some() {
            state.counters.evictions += 1;
            true
        } else {
            false
        }
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        state.counters.evictions += count as u64;
        count
    }

    /// Purges expired entries and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.counters.evictions += removed as u64;
        removed
    }

    /// Adds time to an entry's TTL. Returns `false` if the entry is absent.
    pub fn extend_ttl(&self, key: &CacheKey, additional: Duration) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.ttl = entry.ttl.saturating_add(additional);
                true
            }
            None => false,
        }
    }

    /// Resets an entry's timestamp without changing its payload or TTL.
    pub fn touch(&self, key: &CacheKey) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.created_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Sets the TTL used by future `set` calls that pass `None`.
    pub fn set_default_ttl(&self, ttl: Duration) {
        self.lock().default_ttl = ttl;
    }

    pub fn default_ttl(&self) -> Duration {
        self.lock().default_ttl
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.lock();
        let counters = state.counters;

        let expired_entries = state
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .count();
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups > 0 {
            round2(counters.hits as f64 / lookups as f64 * 100.0)
        } else {
            0.0
        };

        CacheStats {
            enabled: self.is_enabled(),
            total_entries: state.entries.len(),
            valid_entries: state.entries.len() - expired_entries,
            expired_entries,
            default_ttl_secs: state.default_ttl.as_secs_f64(),
            hit_rate,
            hits: counters.hits,
            misses: counters.misses,
            sets: counters.sets,
            evictions: counters.evictions,
        }
    }

    pub fn entry_info(&self, key: &CacheKey) -> Option<CacheEntryInfo> {
        let now = Instant::now();
        let state = self.lock();
        state.entries.get(key).map(|entry| entry.info(key, now))
    }

    pub fn cache_info(&self) -> CacheInfo {
        let now = Instant::now();
        let state = self.lock();

        let mut entries: Vec<CacheEntryInfo> = state
            .entries
            .iter()
            .map(|(key, entry)| entry.info(key, now))
            .collect();
        entries.sort_by(|a, b| a.expires_in_secs.total_cmp(&b.expires_in_secs));

        let size_estimate = entries.iter().map(|entry| entry.size_estimate).sum();
        CacheInfo {
            entries,
            size_estimate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn size_estimate(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(path: &str) -> CacheKey {
        CacheKey::new(path, &Params::new())
    }

    #[test]
    fn test_key_ignores_parameter_order() {
        let mut first = Params::new();
        first.insert("limit".to_string(), "10".to_string());
        first.insert("before".to_string(), "x".to_string());
        first.insert("after".to_string(), "y".to_string());

        let mut second = Params::new();
        second.insert("after".to_string(), "y".to_string());
        second.insert("limit".to_string(), "10".to_string());
        second.insert("before".to_string(), "x".to_string());

        assert_eq!(
            CacheKey::new("/clans/%23ABC/members", &first),
            CacheKey::new("/clans/%23ABC/members", &second)
        );
    }

    #[test]
    fn test_key_differs_by_value() {
        let mut first = Params::new();
        first.insert("limit".to_string(), "10".to_string());
        let mut second = Params::new();
        second.insert("limit".to_string(), "11".to_string());

        assert_ne!(CacheKey::new("/x", &first), CacheKey::new("/x", &second));
    }

    #[test]
    fn test_never_caches_error_payloads() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let error = json!({"result": "error", "message": "boom", "error_type": "server_error"});

        assert!(!cache.set(key("/locations"), error, None));
        assert_eq!(cache.get(&key("/locations")), None);
        assert_eq!(cache.stats().sets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        let payload = json!({"items": [1, 2, 3]});
        cache.set(key("/locations"), payload.clone(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get(&key("/locations")), Some(payload));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&key("/locations")), None);
        assert_eq!(cache.len(), 0, "expired entry should be purged on read");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_alive_at_exact_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(5));
        cache.set(key("/a"), json!({"ok": true}), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get(&key("/a")).is_some());
    }

    #[test]
    fn test_disabled_cache_reports_absent() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(key("/a"), json!({"ok": true}), None);
        cache.disable();

        assert_eq!(cache.get(&key("/a")), None);
        assert!(!cache.set(key("/b"), json!({"ok": true}), None));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().misses, 0);

        cache.enable();
        assert!(cache.get(&key("/a")).is_some());
    }

    #[test]
    fn test_removal_operations_are_idempotent() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(key("/a"), json!(1), None);
        cache.set(key("/b"), json!(2), None);

        assert!(cache.invalidate(&key("/a")));
        assert!(!cache.invalidate(&key("/a")));
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.clear(), 0);
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_and_stats_count_expired_entries() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(key("/short"), json!(1), Some(Duration::from_secs(1)));
        cache.set(key("/long"), json!(2), Some(Duration::from_secs(100)));

        tokio::time::advance(Duration::from_secs(2)).await;
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.valid_entries, 1);

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_and_extend_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(key("/a"), json!(1), Some(Duration::from_secs(10)));
        cache.set(key("/b"), json!(2), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.touch(&key("/a")));
        assert!(cache.extend_ttl(&key("/b"), Duration::from_secs(5)));
        assert!(!cache.touch(&key("/missing")));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get(&key("/a")), Some(json!(1)));
        assert_eq!(cache.get(&key("/b")), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_info_sorted_by_expiry() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(key("/late"), json!({"a": 1}), Some(Duration::from_secs(100)));
        cache.set(key("/soon"), json!({"b": 2}), Some(Duration::from_secs(5)));

        let info = cache.cache_info();
        assert_eq!(info.entries[0].key, "/soon");
        assert_eq!(info.entries[1].key, "/late");
        assert_eq!(info.size_estimate, 14);

        let entry = cache.entry_info(&key("/soon")).unwrap();
        assert_eq!(entry.ttl_secs, 5.0);
        assert!(!entry.is_expired);
    }

    #[test]
    fn test_hit_rate() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set(key("/a"), json!(1), None);
        cache.get(&key("/a"));
        cache.get(&key("/a"));
        cache.get(&key("/missing"));

        assert_eq!(cache.stats().hit_rate, 66.67);
    }
}
