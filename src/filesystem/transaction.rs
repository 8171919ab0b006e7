//! # Transactions and Read Snapshots
//!
//! A container has exactly one committed header at a time. Everything else is
//! derived from it:
//!
//! ```text
//!                committed header (snapshot N)
//!               /                             \
//!   TransactionEditor                      ReadSnapshot
//!   editable clone, snapshot N+1           frozen copy of snapshot N
//!   shadow-copies blocks it writes         reads only blocks <= N
//!   commit: header slot (N+1) % 2          unaffected by later commits
//! ```
//!
//! The editor borrows the container mutably, so a second writer cannot exist.
//! Dropping an editor without calling `commit` is a rollback: its blocks were
//! written past the committed high-water mark and no header references them.
//! The next transaction reuses those addresses.
//!
//! Read snapshots own an `Arc` of the disk and a copy of the header, so they
//! can outlive a commit and move to other threads.

use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use super::file_header::{FileHeaderBlock, SubFileMetadata};
use super::sub_file::{SubFileReader, SubFileWriter};
use crate::storage::{DiskIo, Storage};

pub struct TransactionEditor<'a, S: Storage> {
    disk: &'a DiskIo<S>,
    committed: &'a mut FileHeaderBlock,
    header: FileHeaderBlock,
}

impl<'a, S: Storage> TransactionEditor<'a, S> {
    pub(super) fn new(disk: &'a DiskIo<S>, committed: &'a mut FileHeaderBlock) -> Result<Self> {
        let header = committed.clone_editable()?;
        debug!(
            snapshot = header.snapshot_sequence_number(),
            "began transaction"
        );
        Ok(Self {
            disk,
            committed,
            header,
        })
    }

    pub fn header(&self) -> &FileHeaderBlock {
        &self.header
    }

    pub fn snapshot_sequence_number(&self) -> u32 {
        self.header.snapshot_sequence_number()
    }

    pub fn files(&self) -> &[SubFileMetadata] {
        self.header.files()
    }

    pub fn find_file(&self, file_name: &[u8; 16]) -> Option<usize> {
        self.header.find_file(file_name)
    }

    /// Adds an empty sub-file and returns its index.
    pub fn create_file(&mut self, file_name: [u8; 16]) -> Result<usize> {
        self.header.create_new_file(file_name)?;
        Ok(self.header.files().len() - 1)
    }

    /// Node store over sub-file `index`, writing into this transaction.
    pub fn open_file(&mut self, index: usize) -> Result<SubFileWriter<'_, S>> {
        SubFileWriter::new(self.disk, &mut self.header, index)
    }

    /// Makes every write of this transaction visible atomically.
    pub fn commit(mut self) -> Result<()> {
        self.header.write_to_file_system(self.disk)?;
        *self.committed = self.header;
        Ok(())
    }

    /// Discards every write of this transaction.
    pub fn rollback(self) {
        debug!(
            snapshot = self.header.snapshot_sequence_number(),
            discarded_up_to = self.header.last_allocated_block(),
            "rolled back transaction"
        );
    }
}

/// Consistent view of the container as of one committed snapshot.
pub struct ReadSnapshot<S: Storage> {
    disk: Arc<DiskIo<S>>,
    header: FileHeaderBlock,
}

impl<S: Storage> Clone for ReadSnapshot<S> {
    fn clone(&self) -> Self {
        Self {
            disk: Arc::clone(&self.disk),
            header: self.header.clone(),
        }
    }
}

impl<S: Storage> ReadSnapshot<S> {
    pub(super) fn new(disk: Arc<DiskIo<S>>, header: FileHeaderBlock) -> Self {
        Self { disk, header }
    }

    pub fn header(&self) -> &FileHeaderBlock {
        &self.header
    }

    pub fn snapshot_sequence_number(&self) -> u32 {
        self.header.snapshot_sequence_number()
    }

    pub fn files(&self) -> &[SubFileMetadata] {
        self.header.files()
    }

    pub fn find_file(&self, file_name: &[u8; 16]) -> Option<usize> {
        self.header.find_file(file_name)
    }

    pub fn open_file(&self, index: usize) -> Result<SubFileReader<S>> {
        let file = *self.header.file(index)?;
        Ok(SubFileReader::new(
            Arc::clone(&self.disk),
            file,
            self.header.snapshot_sequence_number(),
        ))
    }
}
