//! # Container File Header
//!
//! The file header is the root of everything a snapshot can see: the block
//! size, the snapshot sequence number, the allocation high-water mark and the
//! directory of sub-files with their index roots.
//!
//! ## Header Slots
//!
//! Blocks 0 and 1 are reserved header slots. Snapshot `N` is always written
//! to slot `N % 2`, so a commit never overwrites the header it replaces:
//!
//! ```text
//! commit N+1:  sync(all data and index blocks of N+1)
//!              write slot (N+1) % 2
//!              sync
//! ```
//!
//! If the process dies while the slot is being written, its checksum fails
//! on the next open and the other slot (snapshot `N`) wins. Opening reads
//! both slots and keeps the valid one with the higher snapshot number.
//!
//! ## Header Layout (data area of the slot block)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------
//! 0       16    magic "snaptree header\0"
//! 16      1     version (0)
//! 17      3     reserved
//! 20      4     block_size
//! 24      4     snapshot_sequence_number
//! 28      4     last_allocated_block
//! 32      2     file_count
//! 34      2     reserved
//! 36      44*n  sub-file entries
//! ```
//!
//! ## Sub-File Entry Layout (44 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------
//! 0       16    file_name (stream type identifier)
//! 16      2     file_id (sequential from 1)
//! 18      2     reserved
//! 20      4     direct_block
//! 24      4     single_indirect_block
//! 28      4     double_indirect_block
//! 32      4     triple_indirect_block
//! 36      4     data_block_count
//! 40      4     total_block_count
//! ```
//!
//! ## Editability
//!
//! A header read from disk is immutable. A transaction works on the result of
//! [`FileHeaderBlock::clone_editable`], which carries the next snapshot
//! number. Dropping the clone without committing discards every change.

use eyre::{ensure, Result, WrapErr};
use tracing::debug;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{BLOCK_FOOTER_LENGTH, FIRST_ALLOCATABLE_BLOCK, HEADER_SLOT_COUNT};
use crate::error::StoreError;
use crate::storage::{BlockFooter, BlockStamp, BlockType, DiskIo, Storage};

pub const HEADER_MAGIC: &[u8; 16] = b"snaptree header\0";
pub const HEADER_VERSION: u8 = 0;

pub const HEADER_PREFIX_SIZE: usize = 36;
pub const SUB_FILE_ENTRY_SIZE: usize = 44;

/// Highest block address handed out by a fresh container. The first block
/// the allocator returns is therefore 2, right after the header slots.
const INITIAL_LAST_ALLOCATED_BLOCK: u32 = FIRST_ALLOCATABLE_BLOCK - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Create,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct HeaderPrefix {
    magic: [u8; 16],
    version: u8,
    reserved: [u8; 3],
    block_size: U32,
    snapshot: U32,
    last_allocated_block: U32,
    file_count: U16,
    reserved2: [u8; 2],
}

const _: () = assert!(std::mem::size_of::<HeaderPrefix>() == HEADER_PREFIX_SIZE);

/// Directory entry for one sub-file.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SubFileMetadata {
    file_name: [u8; 16],
    file_id: U16,
    reserved: [u8; 2],
    direct_block: U32,
    single_indirect_block: U32,
    double_indirect_block: U32,
    triple_indirect_block: U32,
    data_block_count: U32,
    total_block_count: U32,
}

const _: () = assert!(std::mem::size_of::<SubFileMetadata>() == SUB_FILE_ENTRY_SIZE);

impl SubFileMetadata {
    pub fn new(file_name: [u8; 16], file_id: u16) -> Self {
        Self {
            file_name,
            file_id: U16::new(file_id),
            reserved: [0; 2],
            direct_block: U32::new(0),
            single_indirect_block: U32::new(0),
            double_indirect_block: U32::new(0),
            triple_indirect_block: U32::new(0),
            data_block_count: U32::new(0),
            total_block_count: U32::new(0),
        }
    }

    pub fn file_name(&self) -> &[u8; 16] {
        &self.file_name
    }

    zerocopy_accessors! {
        file_id: u16,
        direct_block: u32,
        single_indirect_block: u32,
        double_indirect_block: u32,
        triple_indirect_block: u32,
        data_block_count: u32,
        total_block_count: u32,
    }

    /// Address stored in the metadata for a chain with `level` index blocks.
    pub fn root_for_level(&self, level: u8) -> u32 {
        match level {
            0 => self.direct_block(),
            1 => self.single_indirect_block(),
            2 => self.double_indirect_block(),
            _ => self.triple_indirect_block(),
        }
    }

    pub fn set_root_for_level(&mut self, level: u8, address: u32) {
        match level {
            0 => self.set_direct_block(address),
            1 => self.set_single_indirect_block(address),
            2 => self.set_double_indirect_block(address),
            _ => self.set_triple_indirect_block(address),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileHeaderBlock {
    block_size: u32,
    snapshot: u32,
    last_allocated_block: u32,
    files: Vec<SubFileMetadata>,
    access: AccessMode,
    editable: bool,
    dirty: bool,
}

impl FileHeaderBlock {
    pub fn open<S: Storage>(disk: &DiskIo<S>, mode: OpenMode, access: AccessMode) -> Result<Self> {
        match mode {
            OpenMode::Create => Self::create(disk, access),
            OpenMode::Open => Self::load(disk, access),
        }
    }

    fn create<S: Storage>(disk: &DiskIo<S>, access: AccessMode) -> Result<Self> {
        if access == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly).wrap_err("cannot create a container read-only");
        }

        let header = Self {
            block_size: disk.block_size() as u32,
            snapshot: 0,
            last_allocated_block: INITIAL_LAST_ALLOCATED_BLOCK,
            files: Vec::new(),
            access,
            editable: false,
            dirty: false,
        };

        for slot in 0..HEADER_SLOT_COUNT {
            header.write_slot(disk, slot)?;
        }
        disk.sync()?;

        debug!(block_size = header.block_size, "created container header");
        Ok(header)
    }

    fn load<S: Storage>(disk: &DiskIo<S>, access: AccessMode) -> Result<Self> {
        let mut best: Option<Self> = None;
        let mut raw = vec![0u8; disk.block_size()];

        for slot in 0..HEADER_SLOT_COUNT {
            if slot >= disk.block_count() {
                break;
            }
            if !disk.read_raw(slot, &mut raw)? {
                debug!(slot, "header slot failed checksum, ignoring");
                continue;
            }

            let candidate = Self::decode(&raw, slot, disk.block_size(), access)?;
            let newer = match &best {
                Some(b) => candidate.snapshot > b.snapshot,
                None => true,
            };
            if newer {
                best = Some(candidate);
            }
        }

        let header = best.ok_or_else(|| StoreError::header_corrupt("no valid header slot"))?;
        debug!(
            snapshot = header.snapshot,
            slot = header.snapshot % HEADER_SLOT_COUNT,
            files = header.files.len(),
            "opened container header"
        );
        Ok(header)
    }

    fn decode(raw: &[u8], slot: u32, block_size: usize, access: AccessMode) -> Result<Self> {
        let footer = BlockFooter::from_block(raw)?;
        if footer.block_type() != BlockType::FileHeader || footer.index_value() != slot {
            return Err(StoreError::header_corrupt(format!(
                "slot {} does not hold a file header block",
                slot
            ))
            .into());
        }

        let prefix = HeaderPrefix::ref_from_bytes(&raw[..HEADER_PREFIX_SIZE])
            .map_err(|e| eyre::eyre!("failed to read header prefix: {:?}", e))?;

        if &prefix.magic != HEADER_MAGIC {
            return Err(StoreError::header_corrupt(format!("bad magic in slot {}", slot)).into());
        }
        if prefix.version != HEADER_VERSION {
            return Err(StoreError::header_corrupt(format!(
                "unsupported header version {} in slot {}",
                prefix.version, slot
            ))
            .into());
        }
        if prefix.block_size.get() as usize != block_size {
            return Err(StoreError::header_corrupt(format!(
                "header block size {} does not match storage block size {}",
                prefix.block_size.get(),
                block_size
            ))
            .into());
        }
        if prefix.snapshot.get() != footer.snapshot() {
            return Err(StoreError::header_corrupt(format!(
                "slot {} snapshot {} disagrees with footer snapshot {}",
                slot,
                prefix.snapshot.get(),
                footer.snapshot()
            ))
            .into());
        }

        let file_count = prefix.file_count.get() as usize;
        let data_length = block_size - BLOCK_FOOTER_LENGTH;
        if HEADER_PREFIX_SIZE + file_count * SUB_FILE_ENTRY_SIZE > data_length {
            return Err(StoreError::header_corrupt(format!(
                "file count {} does not fit in a header block",
                file_count
            ))
            .into());
        }

        let files = raw[HEADER_PREFIX_SIZE..HEADER_PREFIX_SIZE + file_count * SUB_FILE_ENTRY_SIZE]
            .chunks_exact(SUB_FILE_ENTRY_SIZE)
            .map(|chunk| {
                SubFileMetadata::read_from_bytes(chunk)
                    .map_err(|e| eyre::eyre!("failed to read sub-file entry: {:?}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            block_size: prefix.block_size.get(),
            snapshot: prefix.snapshot.get(),
            last_allocated_block: prefix.last_allocated_block.get(),
            files,
            access,
            editable: false,
            dirty: false,
        })
    }

    fn encode(&self, data_length: usize) -> Result<Vec<u8>> {
        let prefix = HeaderPrefix {
            magic: *HEADER_MAGIC,
            version: HEADER_VERSION,
            reserved: [0; 3],
            block_size: U32::new(self.block_size),
            snapshot: U32::new(self.snapshot),
            last_allocated_block: U32::new(self.last_allocated_block),
            file_count: U16::new(self.files.len() as u16),
            reserved2: [0; 2],
        };

        let mut out = Vec::with_capacity(data_length);
        out.extend_from_slice(prefix.as_bytes());
        for file in &self.files {
            out.extend_from_slice(file.as_bytes());
        }

        ensure!(
            out.len() <= data_length,
            "file header of {} bytes exceeds block data length {}",
            out.len(),
            data_length
        );
        Ok(out)
    }

    fn write_slot<S: Storage>(&self, disk: &DiskIo<S>, slot: u32) -> Result<()> {
        let bytes = self.encode(disk.data_length())?;
        disk.write_new_block(slot, &BlockStamp::file_header(slot, self.snapshot), &bytes)
    }

    /// Returns a deep copy carrying the next snapshot number, ready to be
    /// modified by a transaction.
    pub fn clone_editable(&self) -> Result<Self> {
        if self.access == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly.into());
        }

        let next = self
            .snapshot
            .checked_add(1)
            .ok_or_else(|| eyre::eyre!("snapshot sequence number exhausted"))?;

        Ok(Self {
            snapshot: next,
            editable: true,
            dirty: false,
            ..self.clone()
        })
    }

    /// Adds an empty sub-file with the next sequential id.
    pub fn create_new_file(&mut self, file_name: [u8; 16]) -> Result<&SubFileMetadata> {
        self.ensure_editable()?;

        let max_files = (self.block_size as usize - BLOCK_FOOTER_LENGTH - HEADER_PREFIX_SIZE)
            / SUB_FILE_ENTRY_SIZE;
        ensure!(
            self.files.len() < max_files,
            "container already holds the maximum of {} sub-files",
            max_files
        );

        let file_id = self
            .files
            .iter()
            .map(|f| f.file_id())
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| eyre::eyre!("sub-file ids exhausted"))?;

        self.files.push(SubFileMetadata::new(file_name, file_id));
        self.dirty = true;
        debug!(file_id, snapshot = self.snapshot, "created sub-file");

        let index = self.files.len() - 1;
        Ok(&self.files[index])
    }

    /// Hands out the next block address past the high-water mark.
    pub fn allocate_block(&mut self) -> Result<u32> {
        self.ensure_editable()?;

        let next = self
            .last_allocated_block
            .checked_add(1)
            .ok_or_else(|| eyre::eyre!("container block addresses exhausted"))?;
        self.last_allocated_block = next;
        self.dirty = true;
        Ok(next)
    }

    /// Commits this header: flushes every block written so far, then writes
    /// the header slot for this snapshot and flushes again.
    pub fn write_to_file_system<S: Storage>(&mut self, disk: &DiskIo<S>) -> Result<()> {
        self.ensure_editable()?;

        disk.sync().wrap_err("failed to flush blocks before header commit")?;
        self.write_slot(disk, self.snapshot % HEADER_SLOT_COUNT)?;
        disk.sync().wrap_err("failed to flush header commit")?;

        debug!(
            snapshot = self.snapshot,
            last_allocated_block = self.last_allocated_block,
            "committed file header"
        );

        self.editable = false;
        self.dirty = false;
        Ok(())
    }

    fn ensure_editable(&self) -> Result<()> {
        if !self.editable {
            return Err(StoreError::ReadOnly).wrap_err("file header is not editable");
        }
        Ok(())
    }

    pub fn files(&self) -> &[SubFileMetadata] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Result<&SubFileMetadata> {
        self.files
            .get(index)
            .ok_or_else(|| eyre::eyre!("sub-file index {} out of range ({} files)", index, self.files.len()))
    }

    pub fn file_mut(&mut self, index: usize) -> Result<&mut SubFileMetadata> {
        self.ensure_editable()?;
        let count = self.files.len();
        self.dirty = true;
        self.files
            .get_mut(index)
            .ok_or_else(|| eyre::eyre!("sub-file index {} out of range ({} files)", index, count))
    }

    /// Index of the first sub-file with `file_name`.
    pub fn find_file(&self, file_name: &[u8; 16]) -> Option<usize> {
        self.files.iter().position(|f| f.file_name() == file_name)
    }

    pub fn snapshot_sequence_number(&self) -> u32 {
        self.snapshot
    }

    pub fn last_allocated_block(&self) -> u32 {
        self.last_allocated_block
    }

    pub fn block_size(&self) -> usize {
        self.block_size as usize
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Encodes `name` as a zero-padded 16-byte sub-file name.
pub fn file_name(name: &str) -> Result<[u8; 16]> {
    let bytes = name.as_bytes();
    ensure!(
        bytes.len() <= 16,
        "sub-file name {:?} is longer than 16 bytes",
        name
    );
    let mut out = [0u8; 16];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Reads the block size recorded in a raw header slot, if the slot carries
/// the header magic.
pub fn peek_block_size(raw: &[u8]) -> Option<usize> {
    let prefix = HeaderPrefix::ref_from_prefix(raw).ok()?.0;
    (&prefix.magic == HEADER_MAGIC).then(|| prefix.block_size.get() as usize)
}
