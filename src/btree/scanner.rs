//! Forward leaf-chain scanner.
//!
//! A `TreeScanner` walks records from a starting leaf position to the right,
//! hopping leaves through `right_sibling`, and stops before `stop` or at the
//! end of the chain. It is lazy and single-pass; build a new one with
//! `BPlusTree::get_range` to restart. While a leaf is being consumed the
//! scanner asks the store to prefetch the next one.

use std::marker::PhantomData;

use eyre::{Result, WrapErr};

use super::keys::{TreeKey, TreeValue};
use super::leaf::LeafNode;
use super::store::NodeStore;

pub struct TreeScanner<'a, K: TreeKey, V: TreeValue, S: NodeStore> {
    store: &'a S,
    buf: Vec<u8>,
    leaf: u64,
    position: usize,
    stop: Option<K>,
    done: bool,
    _marker: PhantomData<V>,
}

impl<'a, K: TreeKey, V: TreeValue, S: NodeStore> TreeScanner<'a, K, V, S> {
    pub(super) fn new(store: &'a S, leaf: u64, position: usize, stop: Option<K>) -> Result<Self> {
        let mut scanner = Self {
            store,
            buf: vec![0u8; store.node_size()],
            leaf,
            position,
            stop,
            done: false,
            _marker: PhantomData,
        };
        scanner.load(leaf)?;
        Ok(scanner)
    }

    /// Leaf the scanner is currently reading.
    pub fn current_leaf(&self) -> u64 {
        self.leaf
    }

    fn load(&mut self, leaf: u64) -> Result<()> {
        self.store
            .read_node(leaf, &mut self.buf)
            .wrap_err_with(|| format!("failed to read leaf {}", leaf))?;
        let next = LeafNode::<K, V>::from_node(&self.buf)?.right_sibling();
        if next != 0 {
            self.store.prefetch_node(next);
        }
        self.leaf = leaf;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(K, V)>> {
        loop {
            let leaf = LeafNode::<K, V>::from_node(&self.buf)?;
            if self.position < leaf.record_count() {
                let key = leaf.key_at(self.position);
                if self.stop.is_some_and(|stop| key >= stop) {
                    return Ok(None);
                }
                let value = leaf.value_at(self.position);
                self.position += 1;
                return Ok(Some((key, value)));
            }

            let next = leaf.right_sibling();
            if next == 0 {
                return Ok(None);
            }
            self.load(next)?;
            self.position = 0;
        }
    }
}

impl<K: TreeKey, V: TreeValue, S: NodeStore> Iterator for TreeScanner<'_, K, V, S> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use eyre::Result;

    use crate::btree::{BPlusTree, HeaderLayout, MemoryNodeStore, NodeStore};

    struct CountingStore {
        inner: MemoryNodeStore,
        prefetched: RefCell<Vec<u64>>,
    }

    impl NodeStore for CountingStore {
        fn node_size(&self) -> usize {
            self.inner.node_size()
        }

        fn read_node(&self, index: u64, buf: &mut [u8]) -> Result<()> {
            self.inner.read_node(index, buf)
        }

        fn write_node(&mut self, index: u64, buf: &[u8]) -> Result<()> {
            self.inner.write_node(index, buf)
        }

        fn prefetch_node(&self, index: u64) {
            self.prefetched.borrow_mut().push(index);
        }
    }

    fn tree_with(keys: impl Iterator<Item = u64>) -> BPlusTree<u64, u64, CountingStore> {
        let store = CountingStore {
            inner: MemoryNodeStore::new(112),
            prefetched: RefCell::new(Vec::new()),
        };
        let mut tree = BPlusTree::create(store, HeaderLayout::Compact).unwrap();
        for key in keys {
            tree.add(key, key * 3).unwrap();
        }
        tree
    }

    #[test]
    fn scan_yields_values_in_key_order() {
        let tree = tree_with((0..40).rev());

        let records: Vec<(u64, u64)> = tree.scan().unwrap().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 40);
        assert!(records.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(records.iter().all(|(k, v)| *v == k * 3));
    }

    #[test]
    fn scan_from_starts_at_first_key_not_below_start() {
        let tree = tree_with((0..40).map(|k| k * 10));

        let first = tree.scan_from(155).unwrap().next().unwrap().unwrap();

        assert_eq!(first, (160, 480));
    }

    #[test]
    fn stop_key_is_excluded() {
        let tree = tree_with(0..40);

        let keys: Vec<u64> = tree.scan_range(5, 9).unwrap().map(|r| r.unwrap().0).collect();

        assert_eq!(keys, vec![5, 6, 7, 8]);
    }

    #[test]
    fn exhausted_scanner_stays_exhausted() {
        let tree = tree_with(0..3);
        let mut scanner = tree.scan().unwrap();

        assert_eq!(scanner.by_ref().count(), 3);
        assert!(scanner.next().is_none());
    }

    #[test]
    fn crossing_leaves_prefetches_the_next_one() {
        let tree = tree_with(0..60);
        tree.store().prefetched.borrow_mut().clear();

        let _ = tree.scan().unwrap().count();

        assert!(!tree.store().prefetched.borrow().is_empty());
    }
}
