//! Bounded, time-aware account cache keyed by email

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::directory::Account;

#[derive(Debug, Clone)]
struct CachedAccount {
    account: Account,
    inserted_at: Instant,
}

/// Concurrent account cache
///
/// Entries older than the TTL are never returned. Inserting into a full cache
/// first drops expired entries, then the oldest one.
#[derive(Debug)]
pub struct AccountCache {
    entries: DashMap<String, CachedAccount>,
    capacity: usize,
    ttl: Duration,
}

impl AccountCache {
    /// Create a cache holding at most `capacity` accounts for `ttl` each
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Cached account for `email`, if present and fresh
    pub fn get(&self, email: &str) -> Option<Account> {
        {
            let entry = self.entries.get(email)?;
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.account.clone());
            }
        }

        // Read guard must be released before removing from the same shard
        self.entries
            .remove_if(email, |_, v| v.inserted_at.elapsed() >= self.ttl);
        debug!(email = %email, "Cached account expired");
        None
    }

    /// Cache `account` under `email`
    ///
    /// The entry is written first and the cache trimmed back to capacity
    /// afterwards, so racing writers can only ever evict one entry too many.
    pub fn insert(&self, email: &str, account: Account) {
        self.entries.insert(
            email.to_string(),
            CachedAccount {
                account,
                inserted_at: Instant::now(),
            },
        );

        while self.entries.len() > self.capacity {
            if !self.evict(email) {
                break;
            }
        }
    }

    /// Drop the entry for `email`
    pub fn invalidate(&self, email: &str) {
        self.entries.remove(email);
    }

    /// Number of entries, including expired ones not yet removed
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, or the oldest one if none expired
    ///
    /// `keep` is never chosen as the oldest. One pass over the map.
    fn evict(&self, keep: &str) -> bool {
        let mut expired = Vec::new();
        let mut oldest: Option<(String, Instant)> = None;

        for entry in self.entries.iter() {
            let inserted_at = entry.value().inserted_at;
            if inserted_at.elapsed() >= self.ttl {
                expired.push(entry.key().clone());
            } else if entry.key() != keep
                && oldest.as_ref().map_or(true, |(_, at)| inserted_at < *at)
            {
                oldest = Some((entry.key().clone(), inserted_at));
            }
        }

        if !expired.is_empty() {
            for key in &expired {
                self.entries
                    .remove_if(key, |_, v| v.inserted_at.elapsed() >= self.ttl);
            }
            debug!(count = expired.len(), "Dropped expired cached accounts");
            return true;
        }

        match oldest {
            Some((key, _)) => {
                self.entries.remove(&key);
                debug!(email = %key, "Evicted oldest cached account");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = AccountCache::new(10, Duration::from_secs(60));
        assert!(cache.get("a@x.com").is_none());

        cache.insert("a@x.com", account("1"));
        assert_eq!(cache.get("a@x.com").unwrap().id, "1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_not_returned() {
        let cache = AccountCache::new(10, Duration::from_millis(1));
        cache.insert("a@x.com", account("1"));
        std::thread::sleep(Duration::from_millis(10));

        assert!(cache.get("a@x.com").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = AccountCache::new(10, Duration::from_secs(60));
        cache.insert("a@x.com", account("1"));
        cache.invalidate("a@x.com");
        assert!(cache.get("a@x.com").is_none());
    }

    #[test]
    fn test_full_cache_evicts_oldest() {
        let cache = AccountCache::new(2, Duration::from_secs(60));
        cache.insert("a@x.com", account("1"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b@x.com", account("2"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c@x.com", account("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a@x.com").is_none());
        assert!(cache.get("b@x.com").is_some());
        assert!(cache.get("c@x.com").is_some());
    }

    #[test]
    fn test_full_cache_drops_expired_first() {
        let cache = AccountCache::new(2, Duration::from_millis(20));
        cache.insert("a@x.com", account("1"));
        cache.insert("b@x.com", account("2"));
        std::thread::sleep(Duration::from_millis(30));
        cache.insert("c@x.com", account("3"));

        assert_eq!(cache.len(), 1);
        assert!(cache.get("c@x.com").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = AccountCache::new(2, Duration::from_secs(60));
        cache.insert("a@x.com", account("1"));
        cache.insert("b@x.com", account("2"));
        cache.insert("b@x.com", account("2b"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b@x.com").unwrap().id, "2b");
    }

    #[test]
    fn test_concurrent_writers_are_visible() {
        let cache = std::sync::Arc::new(AccountCache::new(100, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.insert(&format!("{}@x.com", i), account(&i.to_string()));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..8 {
            assert_eq!(cache.get(&format!("{}@x.com", i)).unwrap().id, i.to_string());
        }
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        let cache = std::sync::Arc::new(AccountCache::new(4, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.insert(&format!("{}-{}@x.com", t, i), account("x"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(cache.len() <= 4);
        assert!(!cache.is_empty());
    }
}
