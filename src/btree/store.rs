//! Node storage seam for the tree.
//!
//! A tree addresses its nodes by a dense index starting at 0 (the header
//! node). A `NodeStore` maps those indices onto real storage: a sub-file of a
//! container in normal use, or plain memory for standalone trees.

use std::ops::Range;

use eyre::{ensure, eyre, Result};

pub trait NodeStore {
    /// Bytes per node. Every buffer passed to the store has this length.
    fn node_size(&self) -> usize;

    /// Reads node `index` into `buf`. A node never written reads as zeros.
    fn read_node(&self, index: u64, buf: &mut [u8]) -> Result<()>;

    fn write_node(&mut self, index: u64, buf: &[u8]) -> Result<()>;

    /// Hint that `index` will be read soon.
    fn prefetch_node(&self, _index: u64) {}
}

/// In-memory node store.
#[derive(Debug, Clone)]
pub struct MemoryNodeStore {
    node_size: usize,
    nodes: Vec<u8>,
}

impl MemoryNodeStore {
    pub fn new(node_size: usize) -> Self {
        Self {
            node_size,
            nodes: Vec::new(),
        }
    }

    pub fn node_count(&self) -> u64 {
        (self.nodes.len() / self.node_size) as u64
    }

    fn node_range(&self, index: u64) -> Result<Range<usize>> {
        let start = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(self.node_size))
            .filter(|start| start.checked_add(self.node_size).is_some())
            .ok_or_else(|| eyre!("node index {} is out of range", index))?;
        Ok(start..start + self.node_size)
    }
}

impl NodeStore for MemoryNodeStore {
    fn node_size(&self) -> usize {
        self.node_size
    }

    fn read_node(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.node_size,
            "node buffer is {} bytes, expected {}",
            buf.len(),
            self.node_size
        );

        match self.nodes.get(self.node_range(index)?) {
            Some(node) => buf.copy_from_slice(node),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_node(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == self.node_size,
            "node buffer is {} bytes, expected {}",
            buf.len(),
            self.node_size
        );

        let range = self.node_range(index)?;
        if self.nodes.len() < range.end {
            self.nodes.resize(range.end, 0);
        }
        self.nodes[range].copy_from_slice(buf);
        Ok(())
    }
}
