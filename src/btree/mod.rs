//! # B+Tree Index
//!
//! This module implements an ordered index of fixed-width keys to fixed-width
//! values. Nodes live in a [`NodeStore`]: normally a sub-file of a container,
//! where every node write goes through the shadow-copy allocator, or a
//! [`MemoryNodeStore`] for standalone use.
//!
//! ## Node Types
//!
//! - **Leaf Nodes**: sorted `(key, value)` records, chained left to right via
//!   `right_sibling` for range scans.
//!
//! - **Interior Nodes**: a leading child pointer followed by
//!   `(separator, child)` pairs. The separator at position i is the smallest
//!   key reachable through child i+1.
//!
//! ## Store Layout
//!
//! ```text
//! node 0   tree header (Bounded or Compact layout)
//! node 1   initial root leaf
//! node 2.. allocated sequentially as the tree splits
//! ```
//!
//! Node indices are never reused. Combined nodes are abandoned in place.
//!
//! ## Key Types
//!
//! Keys implement [`TreeKey`] and values [`TreeValue`]. Both are encoded
//! little-endian at fixed width. The historian specialization,
//! [`SortedTree256`], maps `(timestamp, point_id)` to `(value1, value2)` and
//! persists the first/last timestamp in its header.
//!
//! ## Thread Safety
//!
//! A tree is a single-threaded handle. Node views borrow scratch buffers and
//! the leaf cache uses interior mutability, so `BPlusTree` is `!Sync`.
//! Concurrency is provided one level up, by giving each reader its own
//! snapshot of the container.

mod header;
mod indexer;
mod interior;
mod keys;
mod leaf;
mod node;
mod scanner;
mod store;
mod tree;

pub use header::{HeaderLayout, TreeHeader, BOUNDED_TREE_TAG, COMPACT_TREE_TAG};
pub use indexer::LeafNodeIndexer;
pub use interior::{interior_capacity, InteriorNode, InteriorNodeMut};
pub use keys::{HistorianKey, HistorianValue, TreeKey, TreeValue};
pub use leaf::{leaf_capacity, LeafNode, LeafNodeMut};
pub use node::{NodeHeader, SearchResult};
pub use scanner::TreeScanner;
pub use store::{MemoryNodeStore, NodeStore};
pub use tree::{BPlusTree, SortedTree256};
