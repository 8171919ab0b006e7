//! # Storage Module
//!
//! The physical layer of a container: a flat array of fixed-size blocks,
//! each ending in a self-describing footer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ filesystem (allocator, header, sub-files)    │
//! └──────────────────────┬───────────────────────┘
//!                        │ read_block / write_new_block
//! ┌──────────────────────▼───────────────────────┐
//! │ DiskIo<S>    footer validation, auto-grow,    │
//! │              RwLock for snapshot readers      │
//! └──────────────────────┬───────────────────────┘
//!                        │ block / block_mut / grow / sync
//! ┌──────────────────────▼───────────────────────┐
//! │ Storage      MemoryStorage | MmapStorage      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Safety Model
//!
//! `Storage::block(&self)` borrows immutably and `Storage::grow(&mut self)`
//! borrows exclusively, so the borrow checker rules out holding a block slice
//! across a remap. `DiskIo` never returns slices; it copies into
//! caller-owned buffers while holding its lock.
//!
//! ## Module Organization
//!
//! - `footer`: block types, the 24-byte footer and its checksum
//! - `memory`: `Vec`-backed storage
//! - `mmap`: memory-mapped file storage
//! - `disk_io`: validated, shared block access

mod disk_io;
mod footer;
mod memory;
mod mmap;

pub use disk_io::{DiskIo, UNALLOCATED};
pub use footer::{checksum_matches, validate_block, BlockFooter, BlockStamp, BlockType};
pub use memory::MemoryStorage;
pub use mmap::MmapStorage;

use eyre::{ensure, Result};

use crate::config::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Raw block storage. Addresses are block numbers starting at 0.
pub trait Storage: Send + Sync {
    fn block_size(&self) -> usize;

    fn block_count(&self) -> u32;

    fn block(&self, address: u32) -> Result<&[u8]>;

    fn block_mut(&mut self, address: u32) -> Result<&mut [u8]>;

    /// Extends the storage to `new_block_count` blocks. Shrinking is a no-op.
    fn grow(&mut self, new_block_count: u32) -> Result<()>;

    fn sync(&self) -> Result<()>;

    fn prefetch_blocks(&self, _start: u32, _count: u32) {}
}

pub fn validate_block_size(block_size: usize) -> Result<()> {
    ensure!(
        block_size.is_power_of_two(),
        "block size {} is not a power of two",
        block_size
    );
    ensure!(
        (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size),
        "block size {} outside supported range {}..={}",
        block_size,
        MIN_BLOCK_SIZE,
        MAX_BLOCK_SIZE
    );
    Ok(())
}
