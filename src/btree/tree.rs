//! # B+Tree Engine
//!
//! Ordered map of fixed-width keys to fixed-width values, stored one node per
//! `NodeStore` slot. Node 0 holds the tree header; node indices are handed out
//! sequentially from `last_allocated_node` and never reused.
//!
//! ```text
//!                    [Interior, level 1]
//!                    /        |        \
//!           [Leaf 2]     [Leaf 3]     [Leaf 4]
//!              |------------>|----------->|   right_sibling chain
//! ```
//!
//! ## Structural Protocol
//!
//! Nodes never hold parent pointers. After a node changes shape, the tree
//! reports it upward through one of three notifications, each of which finds
//! the parent by re-descending from the root with a key of the affected node:
//!
//! - `node_was_split(level, first, middle, later)`: insert `middle` with
//!   `later` on its right into the parent, splitting the parent in turn. A
//!   split root grows the tree by one level.
//! - `node_was_rebalanced(level, old_key, new_key)`: the parent separator
//!   `old_key` becomes `new_key`.
//! - `node_was_combined(level, old_key, keep, deleted)`: the parent drops
//!   `old_key` and the pointer to `deleted`. An interior root left with a
//!   single child collapses and the tree shrinks by one level.
//!
//! ## Underflow
//!
//! A non-root node underflows when it holds fewer than `max(1, capacity / 4)`
//! entries. It combines with its same-parent sibling when both fit in one node,
//! otherwise the two split their entries evenly. The left node of the pair is
//! always the survivor of a combine.
//!
//! ## Arena-Based Restructuring
//!
//! Splits and rebalances gather the entries of the affected nodes into a
//! per-operation `bumpalo` arena, lay them out again, and drop the arena in one
//! step when the operation ends.
//!
//! ## Key Bounds
//!
//! The header tracks the smallest and largest `primary()` ever added. Bounds
//! only widen on add and reset when the tree becomes empty, so they are a
//! superset of the live keys. An empty tree reports `first_key > last_key`.

use std::marker::PhantomData;

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{ensure, Result, WrapErr};
use tracing::{debug, trace};

use super::header::{HeaderLayout, TreeHeader};
use super::indexer::LeafNodeIndexer;
use super::interior::{interior_capacity, InteriorNode, InteriorNodeMut};
use super::keys::{HistorianKey, HistorianValue, TreeKey, TreeValue};
use super::leaf::{leaf_capacity, LeafNode, LeafNodeMut};
use super::node::SearchResult;
use super::scanner::TreeScanner;
use super::store::NodeStore;
use crate::config::{MAX_TREE_DEPTH, TREE_HEADER_NODE};
use crate::error::StoreError;

const MIN_NODE_CAPACITY: usize = 4;

/// Time-series tree: `(timestamp, point_id) -> (value1, value2)`.
pub type SortedTree256<S> = BPlusTree<HistorianKey, HistorianValue, S>;

fn min_entries(capacity: usize) -> usize {
    (capacity / 4).max(1)
}

pub struct BPlusTree<K: TreeKey, V: TreeValue, S: NodeStore> {
    store: S,
    layout: HeaderLayout,
    header: TreeHeader,
    header_changed: bool,
    skip_intermediate_saves: bool,
    leaf_capacity: usize,
    interior_capacity: usize,
    indexer: LeafNodeIndexer<K>,
    _marker: PhantomData<V>,
}

impl<K: TreeKey, V: TreeValue, S: NodeStore> BPlusTree<K, V, S> {
    /// Formats a new tree in `store`: header in node 0, empty root leaf in
    /// node 1.
    pub fn create(mut store: S, layout: HeaderLayout) -> Result<Self> {
        let node_size = store.node_size();
        Self::check_node_size(node_size, layout)?;

        let header = TreeHeader {
            last_allocated_node: 1,
            node_size: node_size as u32,
            root_node: 1,
            root_level: 0,
            first_key: u64::MAX,
            last_key: 0,
        };

        let mut buf = vec![0u8; node_size];
        LeafNodeMut::<K, V>::init(&mut buf)?;
        store
            .write_node(header.root_node, &buf)
            .wrap_err("failed to write root leaf")?;

        let mut tree = Self::with_header(store, layout, header);
        tree.save()?;

        debug!(
            node_size,
            ?layout,
            leaf_capacity = tree.leaf_capacity,
            interior_capacity = tree.interior_capacity,
            "created tree"
        );
        Ok(tree)
    }

    /// Loads an existing tree from node 0 of `store`.
    pub fn open(store: S, layout: HeaderLayout) -> Result<Self> {
        let node_size = store.node_size();
        Self::check_node_size(node_size, layout)?;

        let mut buf = vec![0u8; node_size];
        store
            .read_node(TREE_HEADER_NODE, &mut buf)
            .wrap_err("failed to read tree header")?;
        let header = layout.decode(&buf)?;

        if header.node_size as usize != node_size {
            return Err(StoreError::header_corrupt(format!(
                "tree was written with {} byte nodes, store has {}",
                header.node_size, node_size
            ))
            .into());
        }
        if header.root_node == TREE_HEADER_NODE
            || header.root_node > header.last_allocated_node
            || header.root_level as usize > MAX_TREE_DEPTH
        {
            return Err(StoreError::header_corrupt(format!(
                "root node {} at level {} is out of range",
                header.root_node, header.root_level
            ))
            .into());
        }

        let mut tree = Self::with_header(store, layout, header);
        if layout == HeaderLayout::Compact {
            tree.recompute_bounds()?;
        }

        debug!(
            root = tree.header.root_node,
            level = tree.header.root_level,
            last_allocated = tree.header.last_allocated_node,
            "opened tree"
        );
        Ok(tree)
    }

    fn check_node_size(node_size: usize, layout: HeaderLayout) -> Result<()> {
        ensure!(
            u32::try_from(node_size).is_ok(),
            "node size {} does not fit the tree header",
            node_size
        );
        ensure!(
            node_size >= layout.encoded_len(),
            "node size {} cannot hold the {:?} tree header",
            node_size,
            layout
        );
        ensure!(
            leaf_capacity::<K, V>(node_size) >= MIN_NODE_CAPACITY,
            "node size {} holds only {} leaf records",
            node_size,
            leaf_capacity::<K, V>(node_size)
        );
        ensure!(
            interior_capacity::<K>(node_size) >= MIN_NODE_CAPACITY,
            "node size {} holds only {} separators",
            node_size,
            interior_capacity::<K>(node_size)
        );
        Ok(())
    }

    fn with_header(store: S, layout: HeaderLayout, header: TreeHeader) -> Self {
        let node_size = header.node_size as usize;
        Self {
            store,
            layout,
            header,
            header_changed: false,
            skip_intermediate_saves: false,
            leaf_capacity: leaf_capacity::<K, V>(node_size),
            interior_capacity: interior_capacity::<K>(node_size),
            indexer: LeafNodeIndexer::new(),
            _marker: PhantomData,
        }
    }

    fn recompute_bounds(&mut self) -> Result<()> {
        let first = self.leftmost_leaf()?;
        let buf = self.load(first)?;
        let leaf = LeafNode::<K, V>::from_node(&buf)?;
        if leaf.record_count() == 0 {
            self.header.first_key = u64::MAX;
            self.header.last_key = 0;
            return Ok(());
        }
        self.header.first_key = leaf.key_at(0).primary();

        let last = self.rightmost_leaf()?;
        let buf = self.load(last)?;
        let leaf = LeafNode::<K, V>::from_node(&buf)?;
        ensure!(leaf.record_count() > 0, "rightmost leaf {} is empty", last);
        self.header.last_key = leaf.key_at(leaf.record_count() - 1).primary();
        Ok(())
    }

    pub fn layout(&self) -> HeaderLayout {
        self.layout
    }

    pub fn node_size(&self) -> usize {
        self.header.node_size as usize
    }

    pub fn root_node(&self) -> u64 {
        self.header.root_node
    }

    pub fn root_level(&self) -> u8 {
        self.header.root_level
    }

    pub fn last_allocated_node(&self) -> u64 {
        self.header.last_allocated_node
    }

    pub fn first_key(&self) -> u64 {
        self.header.first_key
    }

    pub fn last_key(&self) -> u64 {
        self.header.last_key
    }

    pub fn is_empty(&self) -> bool {
        self.header.first_key > self.header.last_key
    }

    pub fn leaf_capacity(&self) -> usize {
        self.leaf_capacity
    }

    pub fn interior_capacity(&self) -> usize {
        self.interior_capacity
    }

    /// When set, mutations leave the header dirty and the caller persists it
    /// with `save`.
    pub fn set_skip_intermediate_saves(&mut self, skip: bool) {
        self.skip_intermediate_saves = skip;
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Writes the header to node 0.
    pub fn save(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.node_size()];
        self.layout.encode(&self.header, &mut buf)?;
        self.store
            .write_node(TREE_HEADER_NODE, &buf)
            .wrap_err("failed to write tree header")?;
        self.header_changed = false;
        Ok(())
    }

    fn save_if_changed(&mut self) -> Result<()> {
        if self.header_changed && !self.skip_intermediate_saves {
            self.save()?;
        }
        Ok(())
    }

    fn load(&self, index: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.node_size()];
        self.store
            .read_node(index, &mut buf)
            .wrap_err_with(|| format!("failed to read node {}", index))?;
        Ok(buf)
    }

    fn write(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        self.store
            .write_node(index, buf)
            .wrap_err_with(|| format!("failed to write node {}", index))
    }

    fn next_node_index(&self) -> Result<u64> {
        self.header
            .last_allocated_node
            .checked_add(1)
            .ok_or_else(|| eyre::eyre!("node index space exhausted"))
    }

    /// Writes a node at `index` (from `next_node_index`) and only then records
    /// the allocation in the header.
    fn write_new_node(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        self.write(index, buf)?;
        self.header.last_allocated_node = index;
        self.header_changed = true;
        Ok(())
    }

    /// Node at `level` whose subtree is responsible for `key`.
    fn descend_to(&self, key: &K, level: u8) -> Result<u64> {
        ensure!(
            level <= self.header.root_level,
            "cannot descend to level {} of a tree with root level {}",
            level,
            self.header.root_level
        );

        let mut index = self.header.root_node;
        let mut current = self.header.root_level;
        while current > level {
            let buf = self.load(index)?;
            let node = InteriorNode::<K>::from_node(&buf)?;
            ensure!(
                node.level() == current,
                "node {} has level {}, expected {}",
                index,
                node.level(),
                current
            );
            index = node.find_child(key).1;
            current -= 1;
        }
        Ok(index)
    }

    /// Leaf responsible for `key`, consulting the indexer first.
    fn find_leaf(&self, key: &K) -> Result<u64> {
        if let Some(leaf) = self.indexer.get(key) {
            return Ok(leaf);
        }

        let mut lower = None;
        let mut upper = None;
        let mut index = self.header.root_node;
        let mut current = self.header.root_level;
        while current > 0 {
            let buf = self.load(index)?;
            let node = InteriorNode::<K>::from_node(&buf)?;
            ensure!(
                node.level() == current,
                "node {} has level {}, expected {}",
                index,
                node.level(),
                current
            );
            let (slot, child) = node.find_child(key);
            if slot > 0 {
                lower = Some(node.key_at(slot - 1));
            }
            if slot < node.key_count() {
                upper = Some(node.key_at(slot));
            }
            index = child;
            current -= 1;
        }

        self.indexer.set(lower, upper, index);
        Ok(index)
    }

    pub(super) fn leftmost_leaf(&self) -> Result<u64> {
        self.edge_leaf(|node| node.child_at(0))
    }

    pub(super) fn rightmost_leaf(&self) -> Result<u64> {
        self.edge_leaf(|node| node.last_child())
    }

    fn edge_leaf(&self, pick: impl Fn(&InteriorNode<'_, K>) -> u64) -> Result<u64> {
        let mut index = self.header.root_node;
        for _ in 0..self.header.root_level {
            let buf = self.load(index)?;
            index = pick(&InteriorNode::<K>::from_node(&buf)?);
        }
        Ok(index)
    }

    pub fn get(&self, key: &K) -> Result<V> {
        self.try_get(key)?
            .ok_or_else(|| StoreError::KeyNotFound.into())
    }

    pub fn try_get(&self, key: &K) -> Result<Option<V>> {
        let index = self.find_leaf(key)?;
        let buf = self.load(index)?;
        let leaf = LeafNode::<K, V>::from_node(&buf)?;
        Ok(match leaf.find(key) {
            SearchResult::Found(i) => Some(leaf.value_at(i)),
            SearchResult::NotFound(_) => None,
        })
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.try_get(key)?.is_some())
    }

    pub fn add(&mut self, key: K, value: V) -> Result<()> {
        self.insert_record(key, value)?;
        self.save_if_changed()
    }

    /// Adds every record from an ordered source. Consecutive keys that land
    /// in the same leaf skip the root-to-leaf descent. The header is saved
    /// once at the end.
    pub fn add_sorted<I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<(K, V)>>,
    {
        let saved = std::mem::replace(&mut self.skip_intermediate_saves, true);
        let result = records.into_iter().try_for_each(|record| {
            let (key, value) = record?;
            self.insert_record(key, value)
        });
        self.skip_intermediate_saves = saved;
        result?;
        self.save_if_changed()
    }

    fn insert_record(&mut self, key: K, value: V) -> Result<()> {
        let index = self.find_leaf(&key)?;
        let mut buf = self.load(index)?;
        let mut leaf = LeafNodeMut::<K, V>::from_node(&mut buf)?;

        let pos = match leaf.as_ref().find(&key) {
            SearchResult::Found(_) => return Err(StoreError::DuplicateKey.into()),
            SearchResult::NotFound(pos) => pos,
        };

        let primary = key.primary();
        if !leaf.is_full() {
            leaf.insert_at(pos, &key, &value)?;
            self.write(index, &buf)?;
        } else {
            self.split_leaf(index, &buf, pos, key, value)?;
        }
        self.extend_bounds(primary);
        Ok(())
    }

    fn extend_bounds(&mut self, primary: u64) {
        if primary < self.header.first_key {
            self.header.first_key = primary;
            self.header_changed = true;
        }
        if primary > self.header.last_key {
            self.header.last_key = primary;
            self.header_changed = true;
        }
    }

    fn split_leaf(&mut self, index: u64, buf: &[u8], pos: usize, key: K, value: V) -> Result<()> {
        let arena = Bump::new();
        let mut records: BumpVec<(K, V)> = BumpVec::new_in(&arena);

        let leaf = LeafNode::<K, V>::from_node(buf)?;
        let count = leaf.record_count();
        records.extend((0..count).map(|i| (leaf.key_at(i), leaf.value_at(i))));
        records.insert(pos, (key, value));
        let old_sibling = leaf.right_sibling();

        let mid = records.len() / 2;
        let middle = records[mid].0;
        let new_index = self.next_node_index()?;

        let mut right_buf = vec![0u8; self.node_size()];
        let mut right = LeafNodeMut::<K, V>::init(&mut right_buf)?;
        right.set_records(&records[mid..])?;
        right.set_right_sibling(old_sibling);

        let mut left_buf = vec![0u8; self.node_size()];
        let mut left = LeafNodeMut::<K, V>::init(&mut left_buf)?;
        left.set_records(&records[..mid])?;
        left.set_right_sibling(new_index);

        self.write_new_node(new_index, &right_buf)?;
        self.write(index, &left_buf)?;
        self.indexer.clear();

        trace!(leaf = index, new_leaf = new_index, ?middle, "split leaf");
        self.node_was_split(0, index, middle, new_index)
    }

    /// `first` at `level` was split; `later` now holds the keys from `middle`
    /// upward.
    fn node_was_split(&mut self, level: u8, first: u64, middle: K, later: u64) -> Result<()> {
        if self.header.root_level > level {
            let parent = self.descend_to(&middle, level + 1)?;
            return self.insert_into_interior(parent, first, middle, later);
        }

        let new_level = level + 1;
        ensure!(
            new_level as usize <= MAX_TREE_DEPTH,
            "tree depth would exceed {}",
            MAX_TREE_DEPTH
        );
        let new_root = self.next_node_index()?;
        let mut buf = vec![0u8; self.node_size()];
        let mut root = InteriorNodeMut::<K>::init(&mut buf, new_level, first)?;
        root.insert_at(0, &middle, later)?;
        self.write_new_node(new_root, &buf)?;

        self.header.root_node = new_root;
        self.header.root_level = new_level;
        self.header_changed = true;
        self.indexer.clear();

        debug!(root = new_root, level = new_level, "tree grew a level");
        Ok(())
    }

    fn insert_into_interior(&mut self, index: u64, left: u64, key: K, right: u64) -> Result<()> {
        let mut buf = self.load(index)?;
        let mut node = InteriorNodeMut::<K>::from_node(&mut buf)?;

        let pos = node.as_ref().child_index_for(&key);
        if node.as_ref().child_at(pos) != left {
            return Err(StoreError::LogicError("parent does not reference split node").into());
        }

        if !node.is_full() {
            node.insert_at(pos, &key, right)?;
            return self.write(index, &buf);
        }

        self.split_interior(index, &buf, pos, key, right)
    }

    fn split_interior(&mut self, index: u64, buf: &[u8], pos: usize, key: K, child: u64) -> Result<()> {
        let arena = Bump::new();
        let mut pairs: BumpVec<(K, u64)> = BumpVec::new_in(&arena);

        let node = InteriorNode::<K>::from_node(buf)?;
        let level = node.level();
        let child0 = node.child_at(0);
        pairs.extend((0..node.key_count()).map(|i| (node.key_at(i), node.child_at(i + 1))));
        pairs.insert(pos, (key, child));

        let mid = pairs.len() / 2;
        let (promoted, right_child0) = pairs[mid];
        let new_index = self.next_node_index()?;

        let mut right_buf = vec![0u8; self.node_size()];
        let mut right = InteriorNodeMut::<K>::init(&mut right_buf, level, right_child0)?;
        right.set_contents(right_child0, &pairs[mid + 1..])?;

        let mut left_buf = vec![0u8; self.node_size()];
        let mut left = InteriorNodeMut::<K>::init(&mut left_buf, level, child0)?;
        left.set_contents(child0, &pairs[..mid])?;

        self.write_new_node(new_index, &right_buf)?;
        self.write(index, &left_buf)?;
        self.indexer.clear();

        trace!(node = index, new_node = new_index, level, "split interior node");
        self.node_was_split(level, index, promoted, new_index)
    }

    pub fn update(&mut self, key: &K, value: V) -> Result<()> {
        let index = self.find_leaf(key)?;
        let mut buf = self.load(index)?;
        let mut leaf = LeafNodeMut::<K, V>::from_node(&mut buf)?;
        match leaf.as_ref().find(key) {
            SearchResult::Found(i) => leaf.set_value_at(i, &value),
            SearchResult::NotFound(_) => return Err(StoreError::KeyNotFound.into()),
        }
        self.write(index, &buf)
    }

    pub fn remove(&mut self, key: &K) -> Result<()> {
        let index = self.find_leaf(key)?;
        let mut buf = self.load(index)?;
        let mut leaf = LeafNodeMut::<K, V>::from_node(&mut buf)?;
        match leaf.as_ref().find(key) {
            SearchResult::Found(i) => leaf.remove_at(i)?,
            SearchResult::NotFound(_) => return Err(StoreError::KeyNotFound.into()),
        }
        let remaining = leaf.record_count();
        self.write(index, &buf)?;

        if index != self.header.root_node && remaining < min_entries(self.leaf_capacity) {
            self.handle_underflow(0, index, key)?;
        }

        if self.header.root_level == 0 && !self.is_empty() {
            let root = self.load(self.header.root_node)?;
            if LeafNode::<K, V>::from_node(&root)?.record_count() == 0 {
                self.header.first_key = u64::MAX;
                self.header.last_key = 0;
                self.header_changed = true;
            }
        }

        self.save_if_changed()
    }

    /// Repairs `index` at `level` after it fell below its minimum fill. `key`
    /// is any key routed to `index`.
    fn handle_underflow(&mut self, level: u8, index: u64, key: &K) -> Result<()> {
        let parent_index = self.descend_to(key, level + 1)?;
        let parent_buf = self.load(parent_index)?;
        let parent = InteriorNode::<K>::from_node(&parent_buf)?;

        let slot = parent.child_index_for(key);
        if parent.child_at(slot) != index {
            return Err(StoreError::LogicError("parent does not reference underflowing node").into());
        }
        if parent.key_count() == 0 {
            return Err(StoreError::LogicError("underflowing node has no sibling").into());
        }

        let (left, right, separator_slot) = if slot < parent.key_count() {
            (index, parent.child_at(slot + 1), slot)
        } else {
            (parent.child_at(slot - 1), index, slot - 1)
        };
        let separator = parent.key_at(separator_slot);

        if level == 0 {
            self.merge_or_balance_leaves(left, right, separator)
        } else {
            self.merge_or_balance_interiors(level, left, right, separator)
        }
    }

    fn merge_or_balance_leaves(&mut self, left: u64, right: u64, separator: K) -> Result<()> {
        let left_buf = self.load(left)?;
        let right_buf = self.load(right)?;
        let left_node = LeafNode::<K, V>::from_node(&left_buf)?;
        let right_node = LeafNode::<K, V>::from_node(&right_buf)?;

        let arena = Bump::new();
        let mut records: BumpVec<(K, V)> = BumpVec::new_in(&arena);
        records.extend(
            (0..left_node.record_count()).map(|i| (left_node.key_at(i), left_node.value_at(i))),
        );
        records.extend(
            (0..right_node.record_count()).map(|i| (right_node.key_at(i), right_node.value_at(i))),
        );
        let right_sibling = right_node.right_sibling();

        let mut new_left = vec![0u8; self.node_size()];
        let mut left_leaf = LeafNodeMut::<K, V>::init(&mut new_left)?;

        if records.len() <= self.leaf_capacity {
            left_leaf.set_records(&records)?;
            left_leaf.set_right_sibling(right_sibling);
            self.write(left, &new_left)?;
            self.indexer.clear();

            trace!(keep = left, deleted = right, "combined leaves");
            return self.node_was_combined(0, separator, left, right);
        }

        let half = records.len() / 2;
        left_leaf.set_records(&records[..half])?;
        left_leaf.set_right_sibling(right);

        let mut new_right = vec![0u8; self.node_size()];
        let mut right_leaf = LeafNodeMut::<K, V>::init(&mut new_right)?;
        right_leaf.set_records(&records[half..])?;
        right_leaf.set_right_sibling(right_sibling);

        self.write(left, &new_left)?;
        self.write(right, &new_right)?;
        self.indexer.clear();

        trace!(left, right, "rebalanced leaves");
        self.node_was_rebalanced(0, separator, records[half].0)
    }

    fn merge_or_balance_interiors(
        &mut self,
        level: u8,
        left: u64,
        right: u64,
        separator: K,
    ) -> Result<()> {
        let left_buf = self.load(left)?;
        let right_buf = self.load(right)?;
        let left_node = InteriorNode::<K>::from_node(&left_buf)?;
        let right_node = InteriorNode::<K>::from_node(&right_buf)?;

        let arena = Bump::new();
        let mut pairs: BumpVec<(K, u64)> = BumpVec::new_in(&arena);
        pairs.extend(
            (0..left_node.key_count()).map(|i| (left_node.key_at(i), left_node.child_at(i + 1))),
        );
        pairs.push((separator, right_node.child_at(0)));
        pairs.extend(
            (0..right_node.key_count()).map(|i| (right_node.key_at(i), right_node.child_at(i + 1))),
        );
        let child0 = left_node.child_at(0);

        let mut new_left = vec![0u8; self.node_size()];
        let mut left_interior = InteriorNodeMut::<K>::init(&mut new_left, level, child0)?;

        if pairs.len() <= self.interior_capacity {
            left_interior.set_contents(child0, &pairs)?;
            self.write(left, &new_left)?;
            self.indexer.clear();

            trace!(keep = left, deleted = right, level, "combined interior nodes");
            return self.node_was_combined(level, separator, left, right);
        }

        let half = pairs.len() / 2;
        let (promoted, right_child0) = pairs[half];
        left_interior.set_contents(child0, &pairs[..half])?;

        let mut new_right = vec![0u8; self.node_size()];
        let mut right_interior = InteriorNodeMut::<K>::init(&mut new_right, level, right_child0)?;
        right_interior.set_contents(right_child0, &pairs[half + 1..])?;

        self.write(left, &new_left)?;
        self.write(right, &new_right)?;
        self.indexer.clear();

        trace!(left, right, level, "rebalanced interior nodes");
        self.node_was_rebalanced(level, separator, promoted)
    }

    /// Entries moved between two siblings at `level`; their parent separator
    /// `old_key` becomes `new_key`.
    fn node_was_rebalanced(&mut self, level: u8, old_key: K, new_key: K) -> Result<()> {
        if self.header.root_level <= level {
            return Err(StoreError::LogicError("root node cannot be rebalanced").into());
        }

        let parent_index = self.descend_to(&old_key, level + 1)?;
        let mut buf = self.load(parent_index)?;
        let mut parent = InteriorNodeMut::<K>::from_node(&mut buf)?;
        let pos = parent
            .as_ref()
            .position_of(&old_key)
            .ok_or(StoreError::LogicError("rebalanced separator missing from parent"))?;
        parent.set_key_at(pos, &new_key);
        self.write(parent_index, &buf)?;
        self.indexer.clear();
        Ok(())
    }

    /// `deleted` at `level` was folded into `keep`; the parent drops the
    /// separator `old_key` between them.
    fn node_was_combined(&mut self, level: u8, old_key: K, keep: u64, deleted: u64) -> Result<()> {
        if self.header.root_level <= level {
            return Err(StoreError::LogicError("root node cannot be combined").into());
        }

        let parent_index = self.descend_to(&old_key, level + 1)?;
        let mut buf = self.load(parent_index)?;
        let mut parent = InteriorNodeMut::<K>::from_node(&mut buf)?;
        let pos = parent
            .as_ref()
            .position_of(&old_key)
            .ok_or(StoreError::LogicError("combined separator missing from parent"))?;
        if parent.as_ref().child_at(pos) != keep || parent.as_ref().child_at(pos + 1) != deleted {
            return Err(StoreError::LogicError("parent does not reference combined nodes").into());
        }
        parent.remove_at(pos)?;
        let remaining = parent.key_count();
        self.write(parent_index, &buf)?;
        self.indexer.clear();

        if parent_index == self.header.root_node {
            if remaining == 0 {
                self.collapse_root()?;
            }
            return Ok(());
        }

        if remaining < min_entries(self.interior_capacity) {
            self.handle_underflow(level + 1, parent_index, &old_key)?;
        }
        Ok(())
    }

    fn collapse_root(&mut self) -> Result<()> {
        while self.header.root_level > 0 {
            let buf = self.load(self.header.root_node)?;
            let root = InteriorNode::<K>::from_node(&buf)?;
            if root.key_count() > 0 {
                break;
            }
            self.header.root_node = root.child_at(0);
            self.header.root_level -= 1;
            self.header_changed = true;
            debug!(
                root = self.header.root_node,
                level = self.header.root_level,
                "tree shrank a level"
            );
        }
        self.indexer.clear();
        Ok(())
    }

    /// Forward scan over `[start, stop)`. `None` leaves that side unbounded.
    pub fn get_range(&self, start: Option<K>, stop: Option<K>) -> Result<TreeScanner<'_, K, V, S>> {
        let (leaf, position) = match start {
            Some(key) => {
                let leaf = self.find_leaf(&key)?;
                let buf = self.load(leaf)?;
                let position = match LeafNode::<K, V>::from_node(&buf)?.find(&key) {
                    SearchResult::Found(i) | SearchResult::NotFound(i) => i,
                };
                (leaf, position)
            }
            None => (self.leftmost_leaf()?, 0),
        };
        TreeScanner::new(&self.store, leaf, position, stop)
    }

    pub fn scan(&self) -> Result<TreeScanner<'_, K, V, S>> {
        self.get_range(None, None)
    }

    pub fn scan_from(&self, start: K) -> Result<TreeScanner<'_, K, V, S>> {
        self.get_range(Some(start), None)
    }

    pub fn scan_range(&self, start: K, stop: K) -> Result<TreeScanner<'_, K, V, S>> {
        self.get_range(Some(start), Some(stop))
    }
}
