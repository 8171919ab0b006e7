//! # B+Tree Leaf Node
//!
//! Leaf nodes hold the key/value records. Records are fixed width, so a leaf
//! is a plain sorted array behind the node header:
//!
//! ```text
//! +----------------------+
//! | NodeHeader (16B)     |  level = 0, record_count, right_sibling
//! +----------------------+
//! | key 0 | value 0      |  K::SIZE + V::SIZE bytes per record
//! | key 1 | value 1      |
//! | ...                  |  strictly ascending keys
//! +----------------------+
//! | unused               |
//! +----------------------+
//! ```
//!
//! Leaves are chained left to right through `right_sibling` so scans never
//! climb back into the interior levels.
//!
//! `LeafNode` borrows an immutable node buffer and `LeafNodeMut` a mutable
//! one. Neither copies the buffer; the tree reads a node into a scratch
//! buffer, wraps it, and writes the buffer back when done.

use std::marker::PhantomData;

use eyre::{ensure, Result};

use super::keys::{TreeKey, TreeValue};
use super::node::{self, NodeHeader, SearchResult};
use crate::config::NODE_HEADER_SIZE;

/// Records that fit in a leaf of `node_size` bytes.
pub fn leaf_capacity<K: TreeKey, V: TreeValue>(node_size: usize) -> usize {
    node_size.saturating_sub(NODE_HEADER_SIZE) / (K::SIZE + V::SIZE)
}

#[derive(Debug)]
pub struct LeafNode<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

pub struct LeafNodeMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

#[inline]
fn record_offset<K: TreeKey, V: TreeValue>(index: usize) -> usize {
    NODE_HEADER_SIZE + index * (K::SIZE + V::SIZE)
}

fn find_in<K: TreeKey, V: TreeValue>(data: &[u8], count: usize, key: &K) -> SearchResult {
    let mut lo = 0;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let candidate = K::read_from(&data[record_offset::<K, V>(mid)..]);
        match candidate.cmp(key) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return SearchResult::Found(mid),
        }
    }
    SearchResult::NotFound(lo)
}

impl<'a, K: TreeKey, V: TreeValue> LeafNode<'a, K, V> {
    pub fn from_node(data: &'a [u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        ensure!(
            header.is_leaf(),
            "expected leaf node, got level {}",
            header.level()
        );
        ensure!(
            header.record_count() as usize <= leaf_capacity::<K, V>(data.len()),
            "leaf record count {} exceeds capacity",
            header.record_count()
        );
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn record_count(&self) -> usize {
        node::record_count(self.data)
    }

    pub fn right_sibling(&self) -> u64 {
        node::right_sibling(self.data)
    }

    pub fn key_at(&self, index: usize) -> K {
        K::read_from(&self.data[record_offset::<K, V>(index)..])
    }

    pub fn value_at(&self, index: usize) -> V {
        V::read_from(&self.data[record_offset::<K, V>(index) + K::SIZE..])
    }

    pub fn find(&self, key: &K) -> SearchResult {
        find_in::<K, V>(self.data, self.record_count(), key)
    }
}

impl<'a, K: TreeKey, V: TreeValue> LeafNodeMut<'a, K, V> {
    pub fn from_node(data: &'a mut [u8]) -> Result<Self> {
        LeafNode::<K, V>::from_node(data)?;
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    /// Formats `data` as an empty leaf.
    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        NodeHeader::from_bytes_mut(data)?.init(0);
        Ok(Self {
            data,
            _marker: PhantomData,
        })
    }

    pub fn as_ref(&self) -> LeafNode<'_, K, V> {
        LeafNode {
            data: self.data,
            _marker: PhantomData,
        }
    }

    pub fn record_count(&self) -> usize {
        self.as_ref().record_count()
    }

    pub fn capacity(&self) -> usize {
        leaf_capacity::<K, V>(self.data.len())
    }

    pub fn is_full(&self) -> bool {
        self.record_count() >= self.capacity()
    }

    pub fn set_right_sibling(&mut self, sibling: u64) {
        node::set_right_sibling(self.data, sibling);
    }

    pub fn write_record(&mut self, index: usize, key: &K, value: &V) {
        let off = record_offset::<K, V>(index);
        key.write_to(&mut self.data[off..off + K::SIZE]);
        value.write_to(&mut self.data[off + K::SIZE..off + K::SIZE + V::SIZE]);
    }

    pub fn set_value_at(&mut self, index: usize, value: &V) {
        let off = record_offset::<K, V>(index) + K::SIZE;
        value.write_to(&mut self.data[off..off + V::SIZE]);
    }

    /// Inserts a record at `index`, shifting later records right.
    pub fn insert_at(&mut self, index: usize, key: &K, value: &V) -> Result<()> {
        let count = self.record_count();
        ensure!(!self.is_full(), "leaf node is full ({} records)", count);
        ensure!(index <= count, "insert index {} past end {}", index, count);

        let start = record_offset::<K, V>(index);
        let end = record_offset::<K, V>(count);
        self.data
            .copy_within(start..end, start + K::SIZE + V::SIZE);
        self.write_record(index, key, value);
        node::set_record_count(self.data, count + 1);
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let count = self.record_count();
        ensure!(index < count, "remove index {} past end {}", index, count);

        let start = record_offset::<K, V>(index + 1);
        let end = record_offset::<K, V>(count);
        self.data
            .copy_within(start..end, record_offset::<K, V>(index));
        node::set_record_count(self.data, count - 1);
        Ok(())
    }

    /// Replaces the contents with `records`.
    pub fn set_records(&mut self, records: &[(K, V)]) -> Result<()> {
        ensure!(
            records.len() <= self.capacity(),
            "{} records exceed leaf capacity {}",
            records.len(),
            self.capacity()
        );
        for (i, (key, value)) in records.iter().enumerate() {
            self.write_record(i, key, value);
        }
        node::set_record_count(self.data, records.len());
        Ok(())
    }
}
