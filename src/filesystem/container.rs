//! # Container File
//!
//! A container is one block store holding a file header and any number of
//! sub-files, each of which typically carries one B+Tree.
//!
//! ## Usage
//!
//! ```ignore
//! use snaptree::btree::{HeaderLayout, HistorianKey, HistorianValue, SortedTree256};
//! use snaptree::filesystem::{file_name, ContainerBuilder};
//!
//! let mut container = ContainerBuilder::new().block_size(4096).create("./points.snap")?;
//!
//! let mut edit = container.begin_edit()?;
//! let index = edit.create_file(file_name("points")?)?;
//! let mut tree = SortedTree256::create(edit.open_file(index)?, HeaderLayout::Bounded)?;
//! tree.add(HistorianKey::new(1_000, 7), HistorianValue::new(42, 0))?;
//! drop(tree);
//! edit.commit()?;
//!
//! let snapshot = container.snapshot();
//! let tree = SortedTree256::open(snapshot.open_file(index)?, HeaderLayout::Bounded)?;
//! ```
//!
//! ## Builder Defaults
//!
//! | Setting          | Default                  |
//! |------------------|--------------------------|
//! | `block_size`     | 4096 bytes               |
//! | `access`         | `AccessMode::ReadWrite`  |
//! | `initial_blocks` | 16                       |
//!
//! When opening an existing file the builder reads the block size stored in
//! the first header slot. If that slot is torn it looks for the second slot
//! one block in, trying every supported block size, and only falls back to
//! the configured size when neither slot names one.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use eyre::{eyre, Result, WrapErr};
use tracing::debug;

use super::file_header::{
    peek_block_size, AccessMode, FileHeaderBlock, OpenMode, SubFileMetadata, HEADER_PREFIX_SIZE,
};
use super::transaction::{ReadSnapshot, TransactionEditor};
use crate::config::{DEFAULT_BLOCK_SIZE, DEFAULT_INITIAL_BLOCKS, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::storage::{validate_block_size, DiskIo, MemoryStorage, MmapStorage, Storage};

pub struct ContainerFile<S: Storage> {
    disk: Arc<DiskIo<S>>,
    header: FileHeaderBlock,
}

impl<S: Storage> ContainerFile<S> {
    /// Formats `storage` as an empty container.
    pub fn create(storage: S) -> Result<Self> {
        validate_block_size(storage.block_size())?;
        let disk = DiskIo::new(storage);
        let header = FileHeaderBlock::open(&disk, OpenMode::Create, AccessMode::ReadWrite)?;

        debug!(block_size = disk.block_size(), "created container");
        Ok(Self {
            disk: Arc::new(disk),
            header,
        })
    }

    pub fn open(storage: S, access: AccessMode) -> Result<Self> {
        validate_block_size(storage.block_size())?;
        let disk = DiskIo::new(storage);
        let header = FileHeaderBlock::open(&disk, OpenMode::Open, access)
            .wrap_err("failed to open container header")?;

        debug!(
            snapshot = header.snapshot_sequence_number(),
            files = header.files().len(),
            ?access,
            "opened container"
        );
        Ok(Self {
            disk: Arc::new(disk),
            header,
        })
    }

    /// The committed header.
    pub fn header(&self) -> &FileHeaderBlock {
        &self.header
    }

    pub fn files(&self) -> &[SubFileMetadata] {
        self.header.files()
    }

    pub fn block_size(&self) -> usize {
        self.disk.block_size()
    }

    pub fn access(&self) -> AccessMode {
        self.header.access()
    }

    /// Starts the single write transaction. Fails with `ReadOnly` on a
    /// read-only container.
    pub fn begin_edit(&mut self) -> Result<TransactionEditor<'_, S>> {
        TransactionEditor::new(&self.disk, &mut self.header)
    }

    /// Captures the committed header for reading.
    pub fn snapshot(&self) -> ReadSnapshot<S> {
        ReadSnapshot::new(Arc::clone(&self.disk), self.header.clone())
    }

    /// Releases the underlying storage. Fails while read snapshots are alive.
    pub fn into_storage(self) -> Result<S> {
        let disk = Arc::try_unwrap(self.disk)
            .map_err(|_| eyre!("container storage is still shared by read snapshots"))?;
        Ok(disk.into_inner())
    }
}

/// Builder for creating and opening containers.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    block_size: Option<usize>,
    access: Option<AccessMode>,
    initial_blocks: Option<u32>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            block_size: None,
            access: None,
            initial_blocks: None,
        }
    }

    /// Block size for new containers. Must be a power of two within the
    /// supported range.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Access mode used by `open`. New containers are always read-write.
    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = Some(access);
        self
    }

    /// Blocks preallocated by `create`. Storage grows on demand past this.
    pub fn initial_blocks(mut self, initial_blocks: u32) -> Self {
        self.initial_blocks = Some(initial_blocks);
        self
    }

    fn resolved_block_size(&self) -> usize {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    fn resolved_initial_blocks(&self) -> u32 {
        self.initial_blocks.unwrap_or(DEFAULT_INITIAL_BLOCKS)
    }

    pub fn create_in_memory(self) -> Result<ContainerFile<MemoryStorage>> {
        let storage = MemoryStorage::new(self.resolved_block_size(), self.resolved_initial_blocks())?;
        ContainerFile::create(storage)
    }

    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<ContainerFile<MmapStorage>> {
        let storage = MmapStorage::create(
            path,
            self.resolved_block_size(),
            self.resolved_initial_blocks(),
        )?;
        ContainerFile::create(storage)
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<ContainerFile<MmapStorage>> {
        let path = path.as_ref();
        let block_size = Self::stored_block_size(path)?.unwrap_or_else(|| self.resolved_block_size());
        let storage = MmapStorage::open(path, block_size)?;
        ContainerFile::open(storage, self.access.unwrap_or(AccessMode::ReadWrite))
    }

    fn stored_block_size(path: &Path) -> Result<Option<usize>> {
        let mut file = File::open(path)
            .wrap_err_with(|| format!("failed to open container file '{}'", path.display()))?;
        let mut prefix = [0u8; HEADER_PREFIX_SIZE];

        if Self::read_prefix_at(&mut file, 0, &mut prefix, path)? {
            let first = peek_block_size(&prefix).filter(|&size| validate_block_size(size).is_ok());
            if first.is_some() {
                return Ok(first);
            }
        }

        // Slot 1 starts exactly one block in and records that same size.
        let mut candidate = MIN_BLOCK_SIZE;
        while candidate <= MAX_BLOCK_SIZE {
            if Self::read_prefix_at(&mut file, candidate as u64, &mut prefix, path)?
                && peek_block_size(&prefix) == Some(candidate)
            {
                debug!(block_size = candidate, "first header slot unreadable, sized from second");
                return Ok(Some(candidate));
            }
            candidate *= 2;
        }
        Ok(None)
    }

    fn read_prefix_at(file: &mut File, offset: u64, prefix: &mut [u8], path: &Path) -> Result<bool> {
        file.seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek in '{}'", path.display()))?;
        match file.read_exact(prefix) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e).wrap_err_with(|| format!("failed to read '{}'", path.display())),
        }
    }
}
