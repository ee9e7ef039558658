//! Scan-cycle scoped cache
//!
//! Authenticity results may only be reused within the cycle that produced
//! them: a wallet that validated in one cycle is asked again in the next.
//! Entries carry the cycle number they were written in, so a stale entry can
//! never be returned even if `begin_cycle` is skipped for a map that was not
//! cleared. Size is bounded; when full, the oldest entry is evicted.

use std::collections::HashMap;
use std::hash::Hash;

/// Default number of entries kept per cycle. One cycle sees at most a few
/// pages of transactions, so this is never reached in normal operation.
pub const DEFAULT_CYCLE_CACHE_SIZE: usize = 1_024;

pub struct CycleCache<K, V> {
    map: HashMap<K, (V, u64, u64)>,
    max_size: usize,
    cycle: u64,
    inserts: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> CycleCache<K, V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
            cycle: 0,
            inserts: 0,
        }
    }

    /// Start a new cycle and drop everything cached in the previous one
    pub fn begin_cycle(&mut self) {
        self.cycle += 1;
        self.map.clear();
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map
            .get(key)
            .filter(|(_, cycle, _)| *cycle == self.cycle)
            .map(|(v, _, _)| v.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        let cycle = self.cycle;
        self.map.retain(|_, (_, c, _)| *c == cycle);
        while self.map.len() >= self.max_size && !self.map.contains_key(&key) {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, (_, _, seq))| *seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.map.remove(&k);
                }
                None => break,
            }
        }
        self.inserts += 1;
        self.map.insert(key, (value, cycle, self.inserts));
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_cycle() {
        let mut cache = CycleCache::new(10);
        cache.begin_cycle();
        cache.insert("wallet", true);
        assert_eq!(cache.get(&"wallet"), Some(true));
        assert_eq!(cache.get(&"other"), None);
    }

    #[test]
    fn test_cleared_on_new_cycle() {
        let mut cache = CycleCache::new(10);
        cache.begin_cycle();
        cache.insert("wallet", false);
        cache.begin_cycle();
        assert_eq!(cache.get(&"wallet"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_max_size_evicts_oldest() {
        let mut cache = CycleCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(3, "c");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some("b"));
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = CycleCache::new(2);
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(2, "b2");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), Some("b2"));
    }
}
