//! Structural cache for derived graphics objects
//!
//! Peripheral systems derive immutable GPU objects (samplers, layouts,
//! pipeline state) from structural parameters. Creating them is CPU
//! expensive, so the device keeps one cache keyed by a hash of those
//! parameters and hands out shared references instead of rebuilding.

use std::any::Any;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Key identifying a cached object by domain and structural hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    domain: &'static str,
    hash: u64,
}

impl CacheKey {
    /// Build a key from a domain tag and hashable creation parameters
    ///
    /// Different domains never collide even when their parameters hash
    /// identically.
    pub fn new<P: Hash>(domain: &'static str, params: &P) -> Self {
        let mut hasher = DefaultHasher::new();
        params.hash(&mut hasher);
        Self {
            domain,
            hash: hasher.finish(),
        }
    }
}

/// Cache for storing and reusing derived graphics objects
///
/// Shared across threads behind the device; entries are type-erased and
/// recovered by downcast on lookup.
pub struct GraphicsCache {
    entries: Mutex<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl GraphicsCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Get the cached object for `key`, creating and inserting it on miss
    ///
    /// `create` runs with the cache lock held and must not reenter the
    /// cache.
    pub fn get_or_create<T, F>(&self, key: CacheKey, create: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(&key) {
            match Arc::clone(entry).downcast::<T>() {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return value;
                }
                Err(_) => {
                    log::warn!("cache key {key:?} reused with a different value type, replacing");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(create());
        entries.insert(key, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        value
    }

    /// Look up a cached object without creating it
    pub fn get<T>(&self, key: &CacheKey) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) => match Arc::clone(entry).downcast::<T>() {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(_) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop one cached entry, returning whether it existed
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Cache hit rate as a percentage
    pub fn hit_rate(&self) -> f32 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            (hits as f32 / total as f32) * 100.0
        }
    }
}

impl Default for GraphicsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Hash)]
    struct SamplerParams {
        filter: u8,
        clamp: bool,
    }

    #[test]
    fn test_get_or_create_counts_hits_and_misses() {
        let cache = GraphicsCache::new();
        let params = SamplerParams {
            filter: 1,
            clamp: true,
        };
        let key = CacheKey::new("sampler", &params);

        let first = cache.get_or_create(key, || 42u32);
        let second = cache.get_or_create(key, || 99u32);

        assert_eq!(*first, 42);
        assert_eq!(*second, 42);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_domains_do_not_collide() {
        let cache = GraphicsCache::new();
        let params = 7u32;

        let a = cache.get_or_create(CacheKey::new("sampler", &params), || 1u32);
        let b = cache.get_or_create(CacheKey::new("layout", &params), || 2u32);

        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = GraphicsCache::new();
        let key = CacheKey::new("sampler", &1u32);
        cache.get_or_create(key, || 1u32);

        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        assert!(cache.is_empty());

        cache.get_or_create(key, || 1u32);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn test_hit_rate_percentage() {
        let cache = GraphicsCache::new();
        assert_eq!(cache.hit_rate(), 0.0);

        let key = CacheKey::new("sampler", &1u32);
        cache.get_or_create(key, || 1u32);
        for _ in 0..3 {
            cache.get_or_create(key, || 1u32);
        }

        assert!((cache.hit_rate() - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_type_mismatch_replaces_entry() {
        let cache = GraphicsCache::new();
        let key = CacheKey::new("sampler", &1u32);

        cache.get_or_create(key, || 42u32);
        let replaced = cache.get_or_create(key, || "layout".to_string());

        assert_eq!(*replaced, "layout");
        assert_eq!(cache.len(), 1);
    }
}
