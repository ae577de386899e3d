//! The shared object cache.
//!
//! The cache holds lightweight snapshots of objects keyed by id, consulted
//! by the precondition evaluator before paying for a real fetch and kept
//! consistent by the dispatcher and the upstream gateway.
//!
//! # Concurrency contract
//!
//! The cache is shared and mutated concurrently by many in-flight requests.
//! Implementations must provide atomic per-key insert/invalidate/clear with
//! last-writer-wins semantics; callers must treat concurrent invalidation as
//! possible between any read and write of an entry and re-fetch on suspected
//! staleness. No lost-update protection beyond at-most-one-winner per key is
//! promised.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::types::Resource;

/// A lightweight projection of an object held by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResourceState {
    /// The object identifier (the cache key).
    pub id: String,
    /// The resource type name.
    pub resource_type: String,
    /// The object's concurrency tag.
    pub version_id: Option<String>,
    /// When the object was last written.
    pub last_modified: Option<DateTime<Utc>>,
    /// One-shot marker forcing the next precondition check to proceed to a
    /// real fetch instead of trusting this entry.
    pub revalidate: bool,
}

impl CachedResourceState {
    /// Creates a snapshot with no version metadata.
    #[must_use]
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            version_id: None,
            last_modified: None,
            revalidate: false,
        }
    }

    /// Sets the version tag.
    #[must_use]
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Sets the last-modified timestamp.
    #[must_use]
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Projects a full object down to its cacheable state.
    #[must_use]
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            version_id: resource.version_id.clone(),
            last_modified: resource.last_modified,
            revalidate: false,
        }
    }
}

/// The object cache contract.
///
/// Passed explicitly to every component that needs it; see the module
/// documentation for the concurrency contract.
pub trait CacheClient: Send + Sync {
    /// Returns the cached state for an id, if any.
    fn get(&self, id: &str) -> Option<CachedResourceState>;

    /// Inserts or refreshes the state for an id (last writer wins).
    fn put(&self, state: CachedResourceState);

    /// Removes the entry for an id.
    fn invalidate(&self, id: &str);

    /// Removes every entry.
    fn clear(&self);

    /// Sets the one-shot revalidation marker on an existing entry.
    fn mark_stale(&self, id: &str);

    /// Atomically tests and clears the revalidation marker.
    ///
    /// Returns `true` at most once per marker so concurrent evaluators
    /// force exactly one real fetch.
    fn take_revalidation(&self, id: &str) -> bool;

    /// Number of entries currently cached.
    fn len(&self) -> usize;

    /// Returns `true` when the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process cache backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, CachedResourceState>,
}

impl InMemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheClient for InMemoryCache {
    fn get(&self, id: &str) -> Option<CachedResourceState> {
        self.entries.get(id).map(|e| e.clone())
    }

    fn put(&self, state: CachedResourceState) {
        self.entries.insert(state.id.clone(), state);
    }

    fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn mark_stale(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.revalidate = true;
        }
    }

    fn take_revalidation(&self, id: &str) -> bool {
        if let Some(mut entry) = self.entries.get_mut(id) {
            if entry.revalidate {
                entry.revalidate = false;
                return true;
            }
        }
        false
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn state(id: &str, version: &str) -> CachedResourceState {
        CachedResourceState::new(id, "Patient").with_version(version)
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = InMemoryCache::new();
        assert!(cache.get("p-1").is_none());

        cache.put(state("p-1", "v1"));
        assert_eq!(cache.get("p-1").unwrap().version_id.as_deref(), Some("v1"));

        cache.invalidate("p-1");
        assert!(cache.get("p-1").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = InMemoryCache::new();
        cache.put(state("p-1", "v1"));
        cache.put(state("p-1", "v2"));
        assert_eq!(cache.get("p-1").unwrap().version_id.as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_revalidation_marker_is_one_shot() {
        let cache = InMemoryCache::new();
        cache.put(state("p-1", "v1"));

        assert!(!cache.take_revalidation("p-1"));
        cache.mark_stale("p-1");
        assert!(cache.take_revalidation("p-1"));
        assert!(!cache.take_revalidation("p-1"));
    }

    #[test]
    fn test_mark_stale_on_missing_entry_is_noop() {
        let cache = InMemoryCache::new();
        cache.mark_stale("ghost");
        assert!(!cache.take_revalidation("ghost"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = InMemoryCache::new();
        cache.put(state("p-1", "v1"));
        cache.put(state("p-2", "v1"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_put_invalidate_keeps_index_consistent() {
        let cache = Arc::new(InMemoryCache::new());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..100 {
                    let id = format!("p-{}", round % 5);
                    if i % 2 == 0 {
                        cache.put(
                            CachedResourceState::new(id, "Patient")
                                .with_version(format!("v{round}")),
                        );
                    } else {
                        cache.invalidate(&id);
                    }
                }
            }));
        }
        for task in tasks {
            task.await.expect("task should not panic");
        }
        // Whatever survived the races must be internally consistent.
        for entry in 0..5 {
            let id = format!("p-{entry}");
            if let Some(state) = cache.get(&id) {
                assert_eq!(state.id, id);
            }
        }
    }
}
