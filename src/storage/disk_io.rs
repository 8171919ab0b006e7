//! # Validated Block I/O
//!
//! `DiskIo` is the only path through which the rest of the crate touches
//! physical blocks. It wraps a [`Storage`] in a `parking_lot::RwLock` so one
//! writer and any number of snapshot readers can share it through an `Arc`.
//!
//! ## Reads
//!
//! Every read names the identity it expects (a [`BlockStamp`]). The footer is
//! checked before any byte is handed back:
//!
//! ```text
//! checksum ─> block type ─> level ─> file id ─> index value ─> snapshot <= bound
//! ```
//!
//! A mismatch at any step is an error. The one exception is address 0, which
//! means "never allocated" in every index pointer; reading it yields a
//! zeroed buffer without touching storage.
//!
//! ## Writes
//!
//! Blocks are only ever written whole, with a fresh footer. Addresses below
//! `FIRST_ALLOCATABLE_BLOCK` are the header slots: they accept file header
//! blocks and nothing else, and file header blocks go nowhere else. Writing
//! past the end of the storage grows it (doubling, so appends amortize).

use eyre::{ensure, Result};
use parking_lot::RwLock;

use super::footer::{checksum_matches, validate_block, BlockFooter, BlockStamp, BlockType};
use super::Storage;
use crate::config::{BLOCK_FOOTER_LENGTH, FIRST_ALLOCATABLE_BLOCK};

/// Physical address that means "not allocated".
pub const UNALLOCATED: u32 = 0;

#[derive(Debug)]
pub struct DiskIo<S: Storage> {
    storage: RwLock<S>,
    block_size: usize,
}

impl<S: Storage> DiskIo<S> {
    pub fn new(storage: S) -> Self {
        let block_size = storage.block_size();
        Self {
            storage: RwLock::new(storage),
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Usable bytes in a block once the footer is excluded.
    pub fn data_length(&self) -> usize {
        self.block_size - BLOCK_FOOTER_LENGTH
    }

    pub fn block_count(&self) -> u32 {
        self.storage.read().block_count()
    }

    /// Copies the data area of `address` into `buf` after validating its
    /// footer against `expected`. Returns the footer actually found.
    pub fn read_block(
        &self,
        address: u32,
        expected: &BlockStamp,
        buf: &mut [u8],
    ) -> Result<Option<BlockFooter>> {
        ensure!(
            buf.len() == self.data_length(),
            "read buffer is {} bytes, block data is {}",
            buf.len(),
            self.data_length()
        );

        if address == UNALLOCATED {
            buf.fill(0);
            return Ok(None);
        }

        let storage = self.storage.read();
        let block = storage.block(address)?;
        let footer = validate_block(block, address, expected)?;
        buf.copy_from_slice(&block[..self.data_length()]);
        Ok(Some(footer))
    }

    /// Reads only the footer of `address`, verifying its checksum.
    pub fn read_footer(&self, address: u32) -> Result<BlockFooter> {
        let storage = self.storage.read();
        let block = storage.block(address)?;

        ensure!(
            checksum_matches(block)?,
            "checksum mismatch in block {}",
            address
        );

        Ok(*BlockFooter::from_block(block)?)
    }

    /// Copies the whole block, footer included, without validation. Returns
    /// whether the stored checksum matches.
    pub fn read_raw(&self, address: u32, buf: &mut [u8]) -> Result<bool> {
        ensure!(
            buf.len() == self.block_size,
            "raw read buffer is {} bytes, block is {}",
            buf.len(),
            self.block_size
        );

        let storage = self.storage.read();
        let block = storage.block(address)?;
        buf.copy_from_slice(block);
        checksum_matches(block)
    }

    /// Writes `data` into `address` and seals the block with `stamp`. Data
    /// shorter than the data area is zero-padded.
    pub fn write_new_block(&self, address: u32, stamp: &BlockStamp, data: &[u8]) -> Result<()> {
        let is_header_slot = address < FIRST_ALLOCATABLE_BLOCK;
        let is_header_block = stamp.block_type == BlockType::FileHeader;
        ensure!(
            is_header_slot == is_header_block,
            "cannot write a {:?} block to address {}",
            stamp.block_type,
            address
        );

        ensure!(
            data.len() <= self.data_length(),
            "block payload of {} bytes exceeds data length {}",
            data.len(),
            self.data_length()
        );

        let mut storage = self.storage.write();
        let count = storage.block_count();
        if address >= count {
            let target = address.saturating_add(1).max(count.saturating_mul(2));
            storage.grow(target)?;
        }

        let block = storage.block_mut(address)?;
        block[..data.len()].copy_from_slice(data);
        block[data.len()..self.block_size - BLOCK_FOOTER_LENGTH].fill(0);
        BlockFooter::new(stamp).seal(block)
    }

    pub fn sync(&self) -> Result<()> {
        self.storage.read().sync()
    }

    pub fn prefetch(&self, address: u32) {
        if address != UNALLOCATED {
            self.storage.read().prefetch_blocks(address, 1);
        }
    }

    pub fn into_inner(self) -> S {
        self.storage.into_inner()
    }

    /// Runs `f` with exclusive access to the underlying storage.
    pub fn with_storage_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.storage.write())
    }
}
