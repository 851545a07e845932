//! A small LRU cache of token validation outcomes.

use std::{num::NonZeroUsize, sync::Mutex};

use lru::LruCache;
use time::{Duration, OffsetDateTime};

/// How many token IDs the cache remembers.
pub const CACHE_CAPACITY: usize = 1000;

/// How long a cached outcome is trusted.
pub const CACHE_TTL: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Copy)]
struct CachedOutcome {
    revoked: bool,
    cached_at: OffsetDateTime,
}

/// Remembers, per token ID, whether the token was revoked the last time it was checked.
#[derive(Debug)]
pub struct RevocationCache {
    entries: Mutex<LruCache<String, CachedOutcome>>,
    ttl: Duration,
}

impl Default for RevocationCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY, CACHE_TTL)
    }
}

impl RevocationCache {
    /// A cache holding up to `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// The cached outcome for `jti`, if it is younger than the TTL.
    ///
    /// A poisoned lock is treated as a miss.
    pub fn get(&self, jti: &str, now: OffsetDateTime) -> Option<bool> {
        let mut entries = self.entries.lock().ok()?;

        match entries.get(jti).copied() {
            Some(outcome) if now - outcome.cached_at < self.ttl => Some(outcome.revoked),
            Some(_) => {
                entries.pop(jti);
                None
            }
            None => None,
        }
    }

    /// Remember whether `jti` is revoked.
    pub fn put(&self, jti: &str, revoked: bool, now: OffsetDateTime) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.put(
                    jti.to_owned(),
                    CachedOutcome {
                        revoked,
                        cached_at: now,
                    },
                );
            }
            Err(error) => tracing::error!("could not lock the token cache: {error}"),
        }
    }

    /// The number of cached outcomes.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod revocation_cache_tests {
    use time::{Duration, macros::datetime};

    use super::RevocationCache;

    const NOW: time::OffsetDateTime = datetime!(2025-08-01 12:00 UTC);

    #[test]
    fn outcomes_expire_after_ttl() {
        let cache = RevocationCache::new(10, Duration::minutes(5));

        cache.put("a", true, NOW);

        assert_eq!(cache.get("a", NOW + Duration::minutes(4)), Some(true));
        assert_eq!(cache.get("a", NOW + Duration::minutes(5)), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = RevocationCache::new(2, Duration::minutes(5));

        cache.put("a", false, NOW);
        cache.put("b", false, NOW);
        cache.get("a", NOW);
        cache.put("c", true, NOW);

        assert_eq!(cache.get("a", NOW), Some(false));
        assert_eq!(cache.get("b", NOW), None);
        assert_eq!(cache.get("c", NOW), Some(true));
    }

    #[test]
    fn later_put_overwrites_outcome() {
        let cache = RevocationCache::default();

        cache.put("a", false, NOW);
        cache.put("a", true, NOW);

        assert_eq!(cache.get("a", NOW), Some(true));
    }
}
