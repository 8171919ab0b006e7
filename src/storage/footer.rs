//! # Block Types and Footer Layout
//!
//! Every physical block ends with a 24-byte footer. The footer is what lets a
//! reader confirm that the block it fetched is the block it expected, and it
//! carries the snapshot sequence number the shadow-copy allocator uses to
//! decide whether a block may still be written in place.
//!
//! ## Footer Layout (24 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  ----------------------------------------------
//! 0       1     block_type     FileHeader, IndexIndirect or DataBlock
//! 1       1     level          Indirection level of an index block (1..=3)
//! 2       2     reserved
//! 4       4     index_value    Virtual block index held (data) or first
//!                              virtual block index covered (index block)
//! 8       4     file_id        Owning sub-file id number (0 for headers)
//! 12      4     snapshot       Snapshot sequence number that wrote the block
//! 16      8     checksum       CRC-64/XZ of data area + bytes 0..16
//! ```
//!
//! ## Snapshot Rule
//!
//! A block stamped with snapshot `N` is immutable once snapshot `N` has been
//! committed. Transaction `N + 1` must copy it to a fresh address before
//! changing it.
//!
//! ## Checksum
//!
//! CRC-64/XZ starts from and finishes with all ones, so a block of zeros
//! (a header slot that was never written, or one zeroed by a torn write)
//! never carries a matching checksum.

use crc::{Crc, CRC_64_XZ};
use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::BLOCK_FOOTER_LENGTH;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Bytes of the footer covered by the checksum.
const CHECKSUMMED_FOOTER_BYTES: usize = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Unknown = 0x00,
    FileHeader = 0x01,
    IndexIndirect = 0x02,
    DataBlock = 0x03,
}

impl BlockType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => BlockType::FileHeader,
            0x02 => BlockType::IndexIndirect,
            0x03 => BlockType::DataBlock,
            _ => BlockType::Unknown,
        }
    }
}

/// Identity a block is written with, and the identity a reader expects.
///
/// When used as an expectation, `snapshot` is an upper bound: a reader at
/// snapshot `N` accepts any block written at or before `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStamp {
    pub block_type: BlockType,
    pub level: u8,
    pub index_value: u32,
    pub file_id: u32,
    pub snapshot: u32,
}

impl BlockStamp {
    pub fn data(index_value: u32, file_id: u32, snapshot: u32) -> Self {
        Self {
            block_type: BlockType::DataBlock,
            level: 0,
            index_value,
            file_id,
            snapshot,
        }
    }

    pub fn index(level: u8, index_value: u32, file_id: u32, snapshot: u32) -> Self {
        Self {
            block_type: BlockType::IndexIndirect,
            level,
            index_value,
            file_id,
            snapshot,
        }
    }

    pub fn file_header(slot: u32, snapshot: u32) -> Self {
        Self {
            block_type: BlockType::FileHeader,
            level: 0,
            index_value: slot,
            file_id: 0,
            snapshot,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockFooter {
    block_type: u8,
    level: u8,
    reserved: [u8; 2],
    index_value: U32,
    file_id: U32,
    snapshot: U32,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<BlockFooter>() == BLOCK_FOOTER_LENGTH);

impl BlockFooter {
    pub fn new(stamp: &BlockStamp) -> Self {
        Self {
            block_type: stamp.block_type as u8,
            level: stamp.level,
            reserved: [0; 2],
            index_value: U32::new(stamp.index_value),
            file_id: U32::new(stamp.file_id),
            snapshot: U32::new(stamp.snapshot),
            checksum: U64::new(0),
        }
    }

    /// Reads the footer from the trailing bytes of a full block.
    pub fn from_block(block: &[u8]) -> Result<&Self> {
        ensure!(
            block.len() > BLOCK_FOOTER_LENGTH,
            "buffer too small for BlockFooter: {} <= {}",
            block.len(),
            BLOCK_FOOTER_LENGTH
        );

        let start = block.len() - BLOCK_FOOTER_LENGTH;
        Self::ref_from_bytes(&block[start..])
            .map_err(|e| eyre::eyre!("failed to read BlockFooter: {:?}", e))
    }

    /// Stamps `block` with this footer, computing the checksum over the data
    /// area and the identity fields.
    pub fn seal(mut self, block: &mut [u8]) -> Result<()> {
        ensure!(
            block.len() > BLOCK_FOOTER_LENGTH,
            "buffer too small for BlockFooter: {} <= {}",
            block.len(),
            BLOCK_FOOTER_LENGTH
        );

        let start = block.len() - BLOCK_FOOTER_LENGTH;
        block[start..].copy_from_slice(self.as_bytes());
        self.checksum = U64::new(compute_checksum(block));
        block[start..].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn block_type(&self) -> BlockType {
        BlockType::from_byte(self.block_type)
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    zerocopy_accessors! {
        index_value: u32,
        file_id: u32,
        snapshot: u32,
        checksum: u64,
    }

    pub fn stamp(&self) -> BlockStamp {
        BlockStamp {
            block_type: self.block_type(),
            level: self.level,
            index_value: self.index_value(),
            file_id: self.file_id(),
            snapshot: self.snapshot(),
        }
    }
}

fn compute_checksum(block: &[u8]) -> u64 {
    let footer_start = block.len() - BLOCK_FOOTER_LENGTH;
    let mut digest = CRC64.digest();
    digest.update(&block[..footer_start + CHECKSUMMED_FOOTER_BYTES]);
    digest.finalize()
}

/// Returns true if the checksum stored in the footer of `block` matches its
/// contents.
pub fn checksum_matches(block: &[u8]) -> Result<bool> {
    let footer = BlockFooter::from_block(block)?;
    Ok(footer.checksum() == compute_checksum(block))
}

/// Verifies a block's footer against what the reader expects.
pub fn validate_block(block: &[u8], address: u32, expected: &BlockStamp) -> Result<BlockFooter> {
    ensure!(
        checksum_matches(block)?,
        "checksum mismatch in block {}",
        address
    );

    let footer = *BlockFooter::from_block(block)?;

    ensure!(
        footer.block_type() == expected.block_type,
        "block {} has type {:?}, expected {:?}",
        address,
        footer.block_type(),
        expected.block_type
    );

    ensure!(
        footer.level() == expected.level,
        "block {} has level {}, expected {}",
        address,
        footer.level(),
        expected.level
    );

    ensure!(
        footer.file_id() == expected.file_id,
        "block {} belongs to file {}, expected {}",
        address,
        footer.file_id(),
        expected.file_id
    );

    ensure!(
        footer.index_value() == expected.index_value,
        "block {} holds index {}, expected {}",
        address,
        footer.index_value(),
        expected.index_value
    );

    ensure!(
        footer.snapshot() <= expected.snapshot,
        "block {} was written by snapshot {} which is newer than {}",
        address,
        footer.snapshot(),
        expected.snapshot
    );

    Ok(footer)
}
