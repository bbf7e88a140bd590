use crate::time::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    stored_at: DateTime<Utc>,
    payload: V,
}

/// Timestamped values with a fixed time-to-live.
///
/// Stale entries are not removed; a read past the TTL is a miss and the next
/// `put` for that key overwrites the entry.
#[derive(Debug)]
pub struct RateCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> RateCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;

        // A negative age (clock stepped back) still counts as fresh.
        let fresh = match (now - entry.stored_at).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        };
        fresh.then(|| entry.payload.clone())
    }

    pub fn put(&self, key: K, payload: V) {
        let entry = CacheEntry {
            stored_at: self.clock.now(),
            payload,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use chrono::TimeZone;

    fn cache() -> (Arc<ManualClock>, RateCache<&'static str, f64>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
        ));
        let cache = RateCache::new(DEFAULT_TTL, clock.clone());
        (clock, cache)
    }

    #[test]
    fn hit_within_ttl() {
        let (clock, cache) = cache();
        cache.put("USD", 1.0);
        clock.advance(chrono::Duration::seconds(299));
        assert_eq!(cache.get(&"USD"), Some(1.0));
    }

    #[test]
    fn miss_at_exactly_ttl() {
        let (clock, cache) = cache();
        cache.put("USD", 1.0);
        clock.advance(chrono::Duration::seconds(300));
        assert_eq!(cache.get(&"USD"), None);
    }

    #[test]
    fn put_overwrites_stale_entry() {
        let (clock, cache) = cache();
        cache.put("USD", 1.0);
        clock.advance(chrono::Duration::minutes(10));
        cache.put("USD", 2.0);
        assert_eq!(cache.get(&"USD"), Some(2.0));
    }

    #[test]
    fn unknown_key_misses() {
        let (_, cache) = cache();
        assert_eq!(cache.get(&"EUR"), None);
    }
}
