//! Header shared by every tree node.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       1     level (0 = leaf)
//! 1       1     reserved
//! 2       2     record_count
//! 4       4     reserved
//! 8       8     right_sibling (node index, 0 = none; leaves only)
//! ```

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::NODE_HEADER_SIZE;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    level: u8,
    reserved: u8,
    record_count: U16,
    reserved2: [u8; 4],
    right_sibling: U64,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn init(&mut self, level: u8) {
        self.level = level;
        self.reserved = 0;
        self.record_count = U16::new(0);
        self.reserved2 = [0; 4];
        self.right_sibling = U64::new(0);
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    zerocopy_accessors! {
        record_count: u16,
        right_sibling: u64,
    }
}

// Fast-path field access for node views whose buffer was already validated
// through NodeHeader.

#[inline]
pub fn level(data: &[u8]) -> u8 {
    data[0]
}

#[inline]
pub fn record_count(data: &[u8]) -> usize {
    u16::from_le_bytes([data[2], data[3]]) as usize
}

#[inline]
pub fn set_record_count(data: &mut [u8], count: usize) {
    data[2..4].copy_from_slice(&(count as u16).to_le_bytes());
}

#[inline]
pub fn right_sibling(data: &[u8]) -> u64 {
    u64::from_le_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ])
}

#[inline]
pub fn set_right_sibling(data: &mut [u8], node: u64) {
    data[8..16].copy_from_slice(&node.to_le_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}
