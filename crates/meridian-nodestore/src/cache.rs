use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use meridian_core::Hash256;

/// Size- and age-bounded cache keyed by hash. Entries expire after the
/// configured time-to-live even if the capacity is not reached.
pub struct TaggedCache<V: Clone> {
    name: &'static str,
    ttl: Duration,
    inner: Mutex<LruCache<Hash256, (Instant, V)>>,
}

impl<V: Clone> TaggedCache<V> {
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("nonzero"),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn insert(&self, key: Hash256, value: V) {
        self.inner.lock().put(key, (Instant::now(), value));
    }

    pub fn get(&self, key: &Hash256) -> Option<V> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some((inserted, value)) if inserted.elapsed() <= self.ttl => Some(value.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &Hash256) -> Option<V> {
        self.inner.lock().pop(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().len() == 0
    }

    /// Drop entries past their time-to-live.
    pub fn sweep(&self) {
        let mut cache = self.inner.lock();
        let expired: Vec<Hash256> = cache
            .iter()
            .filter(|(_, (inserted, _))| inserted.elapsed() > self.ttl)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            cache.pop(&key);
        }
    }
}

/// Remembers which subtree hashes are known to be completely resident, so
/// sync walks can skip them. Two generations: `touch`ed entries live through
/// the current and the following generation.
pub struct FullBelowCache {
    inner: Mutex<FullBelowInner>,
}

struct FullBelowInner {
    current: HashSet<Hash256>,
    previous: HashSet<Hash256>,
    generation: u64,
}

impl Default for FullBelowCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FullBelowCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FullBelowInner {
                current: HashSet::new(),
                previous: HashSet::new(),
                generation: 0,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Mark a subtree root as fully present locally.
    pub fn insert(&self, hash: Hash256) {
        self.inner.lock().current.insert(hash);
    }

    /// Check membership, refreshing the entry's lifetime.
    pub fn touch(&self, hash: &Hash256) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.contains(hash) {
            return true;
        }
        if inner.previous.contains(hash) {
            // Promote so it survives the next rotation.
            inner.current.insert(*hash);
            return true;
        }
        false
    }

    /// Advance the generation, discarding entries not touched since the
    /// previous rotation.
    pub fn rotate(&self) {
        let mut inner = self.inner.lock();
        inner.previous = std::mem::take(&mut inner.current);
        inner.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_cache_ttl_expires() {
        let cache: TaggedCache<u32> = TaggedCache::new("test", 8, Duration::from_millis(0));
        cache.insert(Hash256::from_bytes([1; 32]), 42);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&Hash256::from_bytes([1; 32])), None);
    }

    #[test]
    fn tagged_cache_lru_evicts() {
        let cache: TaggedCache<u32> = TaggedCache::new("test", 2, Duration::from_secs(60));
        for i in 0u8..3 {
            cache.insert(Hash256::from_bytes([i; 32]), i as u32);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&Hash256::from_bytes([0; 32])), None);
        assert_eq!(cache.get(&Hash256::from_bytes([2; 32])), Some(2));
    }

    #[test]
    fn full_below_generations() {
        let cache = FullBelowCache::new();
        let h = Hash256::from_bytes([9; 32]);
        cache.insert(h);
        assert!(cache.touch(&h));
        cache.rotate();
        // Survived one rotation; touching promotes it again.
        assert!(cache.touch(&h));
        cache.rotate();
        assert!(cache.touch(&h));
        // Untouched across two rotations: gone.
        cache.rotate();
        cache.rotate();
        assert!(!cache.touch(&h));
    }
}
