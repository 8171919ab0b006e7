//! # B+Tree Interior Node
//!
//! Interior nodes route a key to the child whose subtree may hold it. With
//! fixed-width keys the body is a leading child pointer followed by
//! `(separator, child)` pairs:
//!
//! ```text
//! +----------------------------------+
//! | NodeHeader (16 bytes)            |  level >= 1, record_count = N
//! +----------------------------------+
//! | child 0          (8 bytes)       |  keys < key 1
//! | key 1 | child 1  (K + 8 bytes)   |  key 1 <= keys < key 2
//! | key 2 | child 2                  |
//! | ...                              |
//! | key N | child N                  |  keys >= key N
//! +----------------------------------+
//! ```
//!
//! Separators are indexed from 0 in the API (`key_at(0)` is "key 1" above)
//! and separator `i` sits between `child_at(i)` and `child_at(i + 1)`.
//!
//! ## Navigation Semantics
//!
//! A key equal to a separator belongs to the child on the separator's right,
//! so the child index for `key` is the number of separators `<= key`.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use super::keys::TreeKey;
use super::node::{self, NodeHeader};
use crate::config::{CHILD_POINTER_SIZE, NODE_HEADER_SIZE};

const PAIRS_START: usize = NODE_HEADER_SIZE + CHILD_POINTER_SIZE;

/// Separators that fit in an interior node of `node_size` bytes.
pub fn interior_capacity<K: TreeKey>(node_size: usize) -> usize {
    node_size.saturating_sub(PAIRS_START) / (K::SIZE + CHILD_POINTER_SIZE)
}

#[inline]
fn key_offset<K: TreeKey>(index: usize) -> usize {
    PAIRS_START + index * (K::SIZE + CHILD_POINTER_SIZE)
}

#[inline]
fn child_offset<K: TreeKey>(index: usize) -> usize {
    if index == 0 {
        NODE_HEADER_SIZE
    } else {
        key_offset::<K>(index - 1) + K::SIZE
    }
}

#[inline]
fn read_child(data: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(bytes)
}

#[derive(Debug)]
pub struct InteriorNode<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

pub struct InteriorNodeMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: TreeKey> InteriorNode<'a, K> {
    pub fn from_node(data: &'a [u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        ensure!(
            !header.is_leaf(),
            "expected interior node, got leaf"
        );
        ensure!(
            header.record_count() as usize <= interior_capacity::<K>(data.len()),
            "interior key count {} exceeds capacity",
            header.record_count()
        );
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn level(&self) -> u8 {
        node::level(self.data)
    }

    pub fn key_count(&self) -> usize {
        node::record_count(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        K::read_from(&self.data[key_offset::<K>(index)..])
    }

    pub fn child_at(&self, index: usize) -> u64 {
        read_child(self.data, child_offset::<K>(index))
    }

    /// Index of the child responsible for `key`.
    pub fn child_index_for(&self, key: &K) -> usize {
        let mut lo = 0;
        let mut hi = self.key_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) <= *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn find_child(&self, key: &K) -> (usize, u64) {
        let index = self.child_index_for(key);
        (index, self.child_at(index))
    }

    /// Separator index holding exactly `key`.
    pub fn position_of(&self, key: &K) -> Option<usize> {
        let index = self.child_index_for(key);
        (index > 0 && self.key_at(index - 1) == *key).then(|| index - 1)
    }

    pub fn last_child(&self) -> u64 {
        self.child_at(self.key_count())
    }
}

impl<'a, K: TreeKey> InteriorNodeMut<'a, K> {
    pub fn from_node(data: &'a mut [u8]) -> Result<Self> {
        InteriorNode::<K>::from_node(data)?;
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// Formats `data` as an interior node with a single child.
    pub fn init(data: &'a mut [u8], level: u8, child0: u64) -> Result<Self> {
        ensure!(level > 0, "interior nodes must have level >= 1");
        NodeHeader::from_bytes_mut(data)?.init(level);
        let mut node = Self {
            data,
            _marker: PhantomData,
        };
        node.write_child(0, child0);
        Ok(node)
    }

    pub fn as_ref(&self) -> InteriorNode<'_, K> {
        InteriorNode {
            data: self.data,
            _marker: PhantomData,
        }
    }

    pub fn key_count(&self) -> usize {
        node::record_count(self.data)
    }

    pub fn capacity(&self) -> usize {
        interior_capacity::<K>(self.data.len())
    }

    pub fn is_full(&self) -> bool {
        self.key_count() >= self.capacity()
    }

    fn write_child(&mut self, index: usize, child: u64) {
        let off = child_offset::<K>(index);
        self.data[off..off + 8].copy_from_slice(&child.to_le_bytes());
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        let off = key_offset::<K>(index);
        key.write_to(&mut self.data[off..off + K::SIZE]);
    }

    /// Inserts separator `key` at `index` with `right_child` on its right.
    pub fn insert_at(&mut self, index: usize, key: &K, right_child: u64) -> Result<()> {
        let count = self.key_count();
        ensure!(!self.is_full(), "interior node is full ({} keys)", count);
        ensure!(index <= count, "insert index {} past end {}", index, count);

        let start = key_offset::<K>(index);
        let end = key_offset::<K>(count);
        self.data
            .copy_within(start..end, start + K::SIZE + CHILD_POINTER_SIZE);
        self.set_key_at(index, key);
        self.write_child(index + 1, right_child);
        node::set_record_count(self.data, count + 1);
        Ok(())
    }

    /// Removes separator `index` together with the child on its right.
    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let count = self.key_count();
        ensure!(index < count, "remove index {} past end {}", index, count);

        let start = key_offset::<K>(index + 1);
        let end = key_offset::<K>(count);
        self.data.copy_within(start..end, key_offset::<K>(index));
        node::set_record_count(self.data, count - 1);
        Ok(())
    }

    /// Replaces the contents with `child0` followed by `pairs`.
    pub fn set_contents(&mut self, child0: u64, pairs: &[(K, u64)]) -> Result<()> {
        ensure!(
            pairs.len() <= self.capacity(),
            "{} separators exceed interior capacity {}",
            pairs.len(),
            self.capacity()
        );
        self.write_child(0, child0);
        for (i, (key, child)) in pairs.iter().enumerate() {
            self.set_key_at(i, key);
            self.write_child(i + 1, *child);
        }
        node::set_record_count(self.data, pairs.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node() -> Vec<u8> {
        vec![0u8; PAIRS_START + 16 * 4]
    }

    #[test]
    fn capacity_accounts_for_leading_child() {
        assert_eq!(interior_capacity::<u64>(PAIRS_START + 16 * 4), 4);
    }

    #[test]
    fn init_sets_level_and_first_child() {
        let mut data = make_node();

        let node = InteriorNodeMut::<u64>::init(&mut data, 2, 7).unwrap();

        assert_eq!(node.as_ref().level(), 2);
        assert_eq!(node.key_count(), 0);
        assert_eq!(node.as_ref().child_at(0), 7);
        assert_eq!(node.as_ref().last_child(), 7);
    }

    #[test]
    fn find_child_routes_equal_keys_right() {
        let mut data = make_node();
        let mut node = InteriorNodeMut::<u64>::init(&mut data, 1, 1).unwrap();
        node.set_contents(1, &[(10, 2), (20, 3)]).unwrap();

        let view = node.as_ref();
        assert_eq!(view.find_child(&5), (0, 1));
        assert_eq!(view.find_child(&10), (1, 2));
        assert_eq!(view.find_child(&15), (1, 2));
        assert_eq!(view.find_child(&20), (2, 3));
        assert_eq!(view.find_child(&99), (2, 3));
    }

    #[test]
    fn insert_places_child_right_of_key() {
        let mut data = make_node();
        let mut node = InteriorNodeMut::<u64>::init(&mut data, 1, 1).unwrap();
        node.insert_at(0, &20, 3).unwrap();

        node.insert_at(0, &10, 2).unwrap();

        let view = node.as_ref();
        assert_eq!(view.key_count(), 2);
        assert_eq!(view.key_at(0), 10);
        assert_eq!(view.key_at(1), 20);
        assert_eq!(
            (0..3).map(|i| view.child_at(i)).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn remove_drops_key_and_right_child() {
        let mut data = make_node();
        let mut node = InteriorNodeMut::<u64>::init(&mut data, 1, 1).unwrap();
        node.set_contents(1, &[(10, 2), (20, 3), (30, 4)]).unwrap();

        node.remove_at(1).unwrap();

        let view = node.as_ref();
        assert_eq!(view.key_count(), 2);
        assert_eq!(view.key_at(1), 30);
        assert_eq!(
            (0..3).map(|i| view.child_at(i)).collect::<Vec<_>>(),
            vec![1, 2, 4]
        );
    }

    #[test]
    fn position_of_finds_exact_separator() {
        let mut data = make_node();
        let mut node = InteriorNodeMut::<u64>::init(&mut data, 1, 1).unwrap();
        node.set_contents(1, &[(10, 2), (20, 3)]).unwrap();

        assert_eq!(node.as_ref().position_of(&20), Some(1));
        assert_eq!(node.as_ref().position_of(&15), None);
        assert_eq!(node.as_ref().position_of(&5), None);
    }

    #[test]
    fn full_node_rejects_insert() {
        let mut data = make_node();
        let mut node = InteriorNodeMut::<u64>::init(&mut data, 1, 1).unwrap();
        node.set_contents(1, &[(10, 2), (20, 3), (30, 4), (40, 5)])
            .unwrap();

        assert!(node.is_full());
        assert!(node.insert_at(4, &50, 6).is_err());
    }

    #[test]
    fn from_node_rejects_leaf() {
        let data = make_node();

        assert!(InteriorNode::<u64>::from_node(&data).is_err());
    }
}
