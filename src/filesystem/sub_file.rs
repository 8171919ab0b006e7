//! Sub-files as tree node stores.
//!
//! Node `n` of a tree lives at virtual offset `n * D` of its sub-file, where
//! `D` is the block data length, so every node is exactly one data block.
//!
//! - [`SubFileWriter`] belongs to a transaction. Each node write lands in a
//!   block owned by the transaction's snapshot, taking a fresh block (and
//!   fresh index blocks above it) the first time a node changes.
//! - [`SubFileReader`] belongs to a read snapshot. It resolves addresses
//!   through the captured header only and refuses writes.

use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};

use super::file_header::{FileHeaderBlock, SubFileMetadata};
use super::index_parser::IndexParser;
use super::shadow_copy::ShadowCopyAllocator;
use crate::btree::NodeStore;
use crate::error::StoreError;
use crate::storage::{BlockStamp, DiskIo, Storage};

fn node_offset(index: u64, data_length: usize) -> Result<(u64, u32)> {
    let block_index = u32::try_from(index)
        .map_err(|_| eyre::eyre!("node index {} exceeds the sub-file block range", index))?;
    let offset = index
        .checked_mul(data_length as u64)
        .ok_or_else(|| eyre::eyre!("node index {} overflows the virtual offset", index))?;
    Ok((offset, block_index))
}

fn read_node_from<S: Storage>(
    disk: &DiskIo<S>,
    file: &SubFileMetadata,
    snapshot: u32,
    index: u64,
    buf: &mut [u8],
) -> Result<()> {
    ensure!(
        buf.len() == disk.data_length(),
        "node buffer is {} bytes, expected {}",
        buf.len(),
        disk.data_length()
    );

    let (offset, block_index) = node_offset(index, disk.data_length())?;
    let address = IndexParser::new(disk, file, snapshot)?.resolve(offset)?;
    let expected = BlockStamp::data(block_index, file.file_id() as u32, snapshot);
    disk.read_block(address, &expected, buf)
        .wrap_err_with(|| format!("failed to read node {} of file {}", index, file.file_id()))?;
    Ok(())
}

pub struct SubFileWriter<'a, S: Storage> {
    disk: &'a DiskIo<S>,
    header: &'a mut FileHeaderBlock,
    file_index: usize,
}

impl<'a, S: Storage> SubFileWriter<'a, S> {
    pub fn new(disk: &'a DiskIo<S>, header: &'a mut FileHeaderBlock, file_index: usize) -> Result<Self> {
        header.file(file_index)?;
        ensure!(
            header.is_editable(),
            "sub-file writers need an editable header"
        );
        Ok(Self {
            disk,
            header,
            file_index,
        })
    }

    pub fn metadata(&self) -> Result<&SubFileMetadata> {
        self.header.file(self.file_index)
    }
}

impl<S: Storage> NodeStore for SubFileWriter<'_, S> {
    fn node_size(&self) -> usize {
        self.disk.data_length()
    }

    fn read_node(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        let file = self.header.file(self.file_index)?;
        read_node_from(
            self.disk,
            file,
            self.header.snapshot_sequence_number(),
            index,
            buf,
        )
    }

    fn write_node(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == self.disk.data_length(),
            "node buffer is {} bytes, expected {}",
            buf.len(),
            self.disk.data_length()
        );

        let (offset, _) = node_offset(index, self.disk.data_length())?;
        ShadowCopyAllocator::new(self.disk, &mut *self.header, self.file_index)
            .write_data_block(offset, buf)?;
        Ok(())
    }
}

/// Read-only view of one sub-file as of a committed snapshot.
pub struct SubFileReader<S: Storage> {
    disk: Arc<DiskIo<S>>,
    file: SubFileMetadata,
    snapshot: u32,
}

impl<S: Storage> SubFileReader<S> {
    pub fn new(disk: Arc<DiskIo<S>>, file: SubFileMetadata, snapshot: u32) -> Self {
        Self {
            disk,
            file,
            snapshot,
        }
    }

    pub fn metadata(&self) -> &SubFileMetadata {
        &self.file
    }

    pub fn snapshot(&self) -> u32 {
        self.snapshot
    }
}

impl<S: Storage> NodeStore for SubFileReader<S> {
    fn node_size(&self) -> usize {
        self.disk.data_length()
    }

    fn read_node(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        read_node_from(&self.disk, &self.file, self.snapshot, index, buf)
    }

    fn write_node(&mut self, _index: u64, _buf: &[u8]) -> Result<()> {
        Err(StoreError::ReadOnly).wrap_err("sub-file opened from a read snapshot")
    }

    fn prefetch_node(&self, index: u64) {
        let Ok((offset, _)) = node_offset(index, self.disk.data_length()) else {
            return;
        };
        let address = IndexParser::new(&self.disk, &self.file, self.snapshot)
            .and_then(|parser| parser.resolve(offset));
        if let Ok(address) = address {
            self.disk.prefetch(address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{AccessMode, OpenMode};
    use crate::storage::MemoryStorage;

    const NAME: [u8; 16] = *b"sub-file-tests\0\0";

    fn editable() -> (DiskIo<MemoryStorage>, FileHeaderBlock) {
        let disk = DiskIo::new(MemoryStorage::new(256, 4).unwrap());
        let committed = FileHeaderBlock::open(&disk, OpenMode::Create, AccessMode::ReadWrite).unwrap();
        let mut header = committed.clone_editable().unwrap();
        header.create_new_file(NAME).unwrap();
        (disk, header)
    }

    #[test]
    fn node_written_by_writer_reads_back() {
        let (disk, mut header) = editable();
        let mut writer = SubFileWriter::new(&disk, &mut header, 0).unwrap();
        let node = vec![0x5Au8; writer.node_size()];

        writer.write_node(3, &node).unwrap();

        let mut buf = vec![0u8; writer.node_size()];
        writer.read_node(3, &mut buf).unwrap();
        assert_eq!(buf, node);
    }

    #[test]
    fn unwritten_nodes_read_as_zero() {
        let (disk, mut header) = editable();
        let writer = SubFileWriter::new(&disk, &mut header, 0).unwrap();

        let mut buf = vec![0xFFu8; writer.node_size()];
        writer.read_node(100, &mut buf).unwrap();

        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn rewriting_a_node_in_one_transaction_reuses_its_block() {
        let (disk, mut header) = editable();
        let mut writer = SubFileWriter::new(&disk, &mut header, 0).unwrap();
        let size = writer.node_size();

        writer.write_node(0, &vec![1u8; size]).unwrap();
        writer.write_node(0, &vec![2u8; size]).unwrap();

        drop(writer);
        assert_eq!(header.last_allocated_block(), 2);
        assert_eq!(header.file(0).unwrap().total_block_count(), 1);
    }

    #[test]
    fn reader_sees_committed_state_and_rejects_writes() {
        let (disk, mut header) = editable();
        let size = disk.data_length();
        SubFileWriter::new(&disk, &mut header, 0)
            .unwrap()
            .write_node(1, &vec![9u8; size])
            .unwrap();
        header.write_to_file_system(&disk).unwrap();

        let disk = Arc::new(disk);
        let mut reader = SubFileReader::new(
            Arc::clone(&disk),
            *header.file(0).unwrap(),
            header.snapshot_sequence_number(),
        );

        let mut buf = vec![0u8; size];
        reader.read_node(1, &mut buf).unwrap();
        assert_eq!(buf, vec![9u8; size]);

        let err = reader.write_node(1, &buf).unwrap_err();
        assert_eq!(StoreError::of(&err), Some(&StoreError::ReadOnly));
    }

    #[test]
    fn committed_header_cannot_back_a_writer() {
        let disk = DiskIo::new(MemoryStorage::new(256, 4).unwrap());
        let mut committed =
            FileHeaderBlock::open(&disk, OpenMode::Create, AccessMode::ReadWrite).unwrap();

        assert!(SubFileWriter::new(&disk, &mut committed, 0).is_err());
    }
}
