//! Recently-validated read tracking.
//!
//! After a successful forwarded read, the gateway records a short-lived
//! marker keyed by `(tag, requested view)`. An immediate repeat read within
//! the window is served locally without a network round-trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Configuration for the revalidation cache.
#[derive(Debug, Clone)]
pub struct RevalidationConfig {
    /// How long a marker stays fresh.
    pub ttl: Duration,
    /// Maximum number of markers held.
    pub max_entries: usize,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            max_entries: 10_000,
        }
    }
}

/// Statistics for the revalidation cache.
#[derive(Debug, Clone, Default)]
pub struct RevalidationStats {
    /// Markers found fresh.
    pub hits: u64,
    /// Lookups that missed or found an expired marker.
    pub misses: u64,
    /// Markers currently held.
    pub size: usize,
}

/// TTL map of recently validated `(tag, view)` pairs.
#[derive(Debug)]
pub struct RecentValidationCache {
    config: RevalidationConfig,
    entries: RwLock<HashMap<(String, String), Instant>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecentValidationCache {
    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn new(config: RevalidationConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(tag: &str, view: Option<&str>) -> (String, String) {
        (tag.to_string(), view.unwrap_or("").to_string())
    }

    /// Records a marker for a validated pair.
    pub fn mark(&self, tag: &str, view: Option<&str>) {
        let mut entries = self.entries.write();
        if entries.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            entries.retain(|_, at| at.elapsed() <= ttl);
        }
        // Still full after sweeping: drop the marker rather than grow.
        if entries.len() < self.config.max_entries {
            entries.insert(Self::key(tag, view), Instant::now());
        }
    }

    /// Returns `true` when the pair was validated within the window.
    pub fn is_fresh(&self, tag: &str, view: Option<&str>) -> bool {
        let entries = self.entries.read();
        let fresh = entries
            .get(&Self::key(tag, view))
            .is_some_and(|at| at.elapsed() <= self.config.ttl);
        if fresh {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Drops every marker.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> RevalidationStats {
        RevalidationStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_check() {
        let cache = RecentValidationCache::new(RevalidationConfig::default());
        assert!(!cache.is_fresh("v1", None));

        cache.mark("v1", None);
        assert!(cache.is_fresh("v1", None));
        // A different view is a different marker.
        assert!(!cache.is_fresh("v1", Some("summary")));
    }

    #[test]
    fn test_expiry() {
        let cache = RecentValidationCache::new(RevalidationConfig {
            ttl: Duration::ZERO,
            max_entries: 16,
        });
        cache.mark("v1", None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.is_fresh("v1", None));
    }

    #[test]
    fn test_capacity_bound() {
        let cache = RecentValidationCache::new(RevalidationConfig {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        });
        cache.mark("v1", None);
        cache.mark("v2", None);
        cache.mark("v3", None);
        assert!(cache.stats().size <= 2);
    }

    #[test]
    fn test_stats() {
        let cache = RecentValidationCache::new(RevalidationConfig::default());
        cache.is_fresh("v1", None);
        cache.mark("v1", None);
        cache.is_fresh("v1", None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }
}
