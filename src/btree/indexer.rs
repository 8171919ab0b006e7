//! Leaf lookup cache.
//!
//! Historian data arrives nearly sorted, so consecutive lookups usually land
//! in the same leaf. `LeafNodeIndexer` remembers the half-open key range the
//! last resolved leaf is responsible for and answers from it without touching
//! the interior levels. Any structural change to the tree clears it.

use std::cell::Cell;

use super::keys::TreeKey;

#[derive(Debug, Clone, Copy)]
struct CachedLeaf<K> {
    lower: Option<K>,
    upper: Option<K>,
    leaf: u64,
}

#[derive(Debug)]
pub struct LeafNodeIndexer<K: TreeKey> {
    cached: Cell<Option<CachedLeaf<K>>>,
}

impl<K: TreeKey> Default for LeafNodeIndexer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TreeKey> LeafNodeIndexer<K> {
    pub fn new() -> Self {
        Self {
            cached: Cell::new(None),
        }
    }

    /// Leaf responsible for `key`, if the cached range covers it.
    pub fn get(&self, key: &K) -> Option<u64> {
        let cached = self.cached.get()?;
        let above_lower = cached.lower.map_or(true, |lower| lower <= *key);
        let below_upper = cached.upper.map_or(true, |upper| *key < upper);
        (above_lower && below_upper).then_some(cached.leaf)
    }

    /// Remembers that `leaf` holds every key in `[lower, upper)`. `None`
    /// means unbounded on that side.
    pub fn set(&self, lower: Option<K>, upper: Option<K>, leaf: u64) {
        self.cached.set(Some(CachedLeaf { lower, upper, leaf }));
    }

    pub fn clear(&self) {
        self.cached.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_indexer_misses() {
        let indexer = LeafNodeIndexer::<u64>::new();

        assert_eq!(indexer.get(&5), None);
    }

    #[test]
    fn range_is_half_open() {
        let indexer = LeafNodeIndexer::<u64>::new();
        indexer.set(Some(10), Some(20), 7);

        assert_eq!(indexer.get(&10), Some(7));
        assert_eq!(indexer.get(&19), Some(7));
        assert_eq!(indexer.get(&20), None);
        assert_eq!(indexer.get(&9), None);
    }

    #[test]
    fn unbounded_sides_match_everything() {
        let indexer = LeafNodeIndexer::<u64>::new();
        indexer.set(None, None, 1);

        assert_eq!(indexer.get(&0), Some(1));
        assert_eq!(indexer.get(&u64::MAX), Some(1));
    }

    #[test]
    fn clear_forgets_range() {
        let indexer = LeafNodeIndexer::<u64>::new();
        indexer.set(None, None, 1);

        indexer.clear();

        assert_eq!(indexer.get(&3), None);
    }
}
