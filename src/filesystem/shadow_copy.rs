//! # Shadow-Copy Allocator
//!
//! Blocks written by a committed snapshot are never modified again. Before a
//! transaction changes a virtual block it asks the allocator for a private
//! copy, and the allocator makes sure every block on the path from the
//! sub-file metadata down to the data block belongs to the current snapshot.
//!
//! ## Algorithm
//!
//! ```text
//! 1. Walk the chain top-down, keeping each index block's contents and the
//!    snapshot that wrote it.
//! 2. Data block already stamped with the current snapshot?  done.
//! 3. Allocate a new data block, copy the old contents (or zeros). A caller
//!    that replaces the whole block passes the new contents instead and the
//!    old ones are never written anywhere.
//! 4. For each index block from the innermost upwards:
//!      point its slot at the new child
//!      written by the current snapshot?  rewrite in place, done.
//!      otherwise allocate a new index block, continue with it as the child.
//! 5. Store the new top of the chain in the sub-file metadata.
//! ```
//!
//! Allocation therefore proceeds bottom-up: the data block receives the
//! lowest new address and the top index block the highest.
//!
//! There is no free list. Replaced blocks stay on disk until the container
//! is rewritten, which is also what keeps older snapshots readable.

use eyre::Result;
use smallvec::SmallVec;
use tracing::trace;

use super::file_header::FileHeaderBlock;
use super::index_parser::{read_address, write_address, IndexParser};
use crate::storage::{BlockStamp, DiskIo, Storage, UNALLOCATED};

struct ChainLevel {
    address: u32,
    written_in: Option<u32>,
    contents: Vec<u8>,
}

pub struct ShadowCopyAllocator<'a, S: Storage> {
    disk: &'a DiskIo<S>,
    header: &'a mut FileHeaderBlock,
    file_index: usize,
}

impl<'a, S: Storage> ShadowCopyAllocator<'a, S> {
    pub fn new(disk: &'a DiskIo<S>, header: &'a mut FileHeaderBlock, file_index: usize) -> Self {
        Self {
            disk,
            header,
            file_index,
        }
    }

    /// Makes the data block holding `offset` writable in the current
    /// snapshot and returns its physical address.
    pub fn shadow_data_block(&mut self, offset: u64) -> Result<u32> {
        self.shadow(offset, None)
    }

    /// Replaces the whole data block holding `offset` with `contents` in the
    /// current snapshot and returns the address written.
    pub fn write_data_block(&mut self, offset: u64, contents: &[u8]) -> Result<u32> {
        self.shadow(offset, Some(contents))
    }

    fn shadow(&mut self, offset: u64, contents: Option<&[u8]>) -> Result<u32> {
        let file = *self.header.file(self.file_index)?;
        let file_id = file.file_id() as u32;
        let snapshot = self.header.snapshot_sequence_number();
        let parser = IndexParser::new(self.disk, &file, snapshot)?;
        let position = parser.mapper().map(offset)?;
        let data_length = self.disk.data_length();

        let mut levels: SmallVec<[ChainLevel; 3]> = SmallVec::new();
        let mut address = file.root_for_level(position.level);
        for depth in 0..position.level as usize {
            let mut contents = vec![0u8; data_length];
            let footer = parser.read_index_block(&position, depth, address, &mut contents)?;
            let next = read_address(&contents, position.slots[depth]);
            levels.push(ChainLevel {
                address,
                written_in: footer.map(|f| f.snapshot()),
                contents,
            });
            address = next;
        }

        let data_stamp = BlockStamp::data(position.block_index, file_id, snapshot);
        let mut old = vec![0u8; data_length];
        let data_footer = self.disk.read_block(address, &data_stamp, &mut old)?;
        if data_footer.is_some_and(|f| f.snapshot() == snapshot) {
            if let Some(contents) = contents {
                self.disk.write_new_block(address, &data_stamp, contents)?;
            }
            return Ok(address);
        }

        let new_data = self.allocate(data_footer.is_none())?;
        self.disk
            .write_new_block(new_data, &data_stamp, contents.unwrap_or(&old))?;
        trace!(
            file_id,
            block_index = position.block_index,
            from = address,
            to = new_data,
            "shadowed data block"
        );

        let mut child = new_data;
        for depth in (0..levels.len()).rev() {
            let level = &mut levels[depth];
            write_address(&mut level.contents, position.slots[depth], child);
            let stamp = BlockStamp::index(depth as u8 + 1, position.covers[depth], file_id, snapshot);

            if level.address != UNALLOCATED && level.written_in == Some(snapshot) {
                self.disk
                    .write_new_block(level.address, &stamp, &level.contents)?;
                return Ok(new_data);
            }

            let new_index = self.allocate(false)?;
            self.disk
                .write_new_block(new_index, &stamp, &level.contents)?;
            trace!(
                file_id,
                depth,
                from = level.address,
                to = new_index,
                "shadowed index block"
            );
            child = new_index;
        }

        self.header
            .file_mut(self.file_index)?
            .set_root_for_level(position.level, child);
        Ok(new_data)
    }

    fn allocate(&mut self, virgin_data: bool) -> Result<u32> {
        let address = self.header.allocate_block()?;
        let file = self.header.file_mut(self.file_index)?;
        file.set_total_block_count(file.total_block_count() + 1);
        if virgin_data {
            file.set_data_block_count(file.data_block_count() + 1);
        }
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::file_header::{AccessMode, OpenMode};
    use crate::filesystem::IndexMapper;
    use crate::storage::MemoryStorage;

    fn setup(block_size: usize) -> (DiskIo<MemoryStorage>, FileHeaderBlock) {
        let disk = DiskIo::new(MemoryStorage::new(block_size, 4).unwrap());
        let mut header = FileHeaderBlock::open(&disk, OpenMode::Create, AccessMode::ReadWrite)
            .unwrap()
            .clone_editable()
            .unwrap();
        header.create_new_file([1; 16]).unwrap();
        (disk, header)
    }

    #[test]
    fn first_write_allocates_block_two() {
        let (disk, mut header) = setup(256);

        let address = ShadowCopyAllocator::new(&disk, &mut header, 0)
            .shadow_data_block(0)
            .unwrap();

        assert_eq!(address, 2);
        assert_eq!(header.files()[0].direct_block(), 2);
        assert_eq!(header.files()[0].data_block_count(), 1);
        assert_eq!(header.files()[0].total_block_count(), 1);
    }

    #[test]
    fn shadowing_twice_in_one_snapshot_is_idempotent() {
        let (disk, mut header) = setup(256);
        let mut alloc = ShadowCopyAllocator::new(&disk, &mut header, 0);

        let first = alloc.shadow_data_block(10).unwrap();
        let second = alloc.shadow_data_block(200).unwrap();

        assert_eq!(first, second);
        assert_eq!(header.last_allocated_block(), 2);
    }

    #[test]
    fn double_indirect_allocates_bottom_up() {
        let (disk, mut header) = setup(256);
        let mapper = IndexMapper::new(256).unwrap();
        let offset = mapper.first_double_indirect_block_index() as u64 * 232;

        let data = ShadowCopyAllocator::new(&disk, &mut header, 0)
            .shadow_data_block(offset)
            .unwrap();

        assert_eq!(data, 2);
        assert_eq!(header.files()[0].double_indirect_block(), 4);
        assert_eq!(header.files()[0].total_block_count(), 3);
        assert_eq!(header.files()[0].data_block_count(), 1);

        let parser =
            IndexParser::new(&disk, &header.files()[0], header.snapshot_sequence_number()).unwrap();
        let chain = parser.resolve_chain(offset).unwrap();
        assert_eq!(chain.first_indirect, 4);
        assert_eq!(chain.second_indirect, 3);
        assert_eq!(chain.data_block, 2);
    }

    #[test]
    fn sibling_block_reuses_current_index_blocks() {
        let (disk, mut header) = setup(256);
        let mut alloc = ShadowCopyAllocator::new(&disk, &mut header, 0);

        alloc.shadow_data_block(232).unwrap();
        let second = alloc.shadow_data_block(2 * 232).unwrap();

        assert_eq!(second, 4);
        assert_eq!(header.last_allocated_block(), 4);
        assert_eq!(header.files()[0].single_indirect_block(), 3);
    }

    #[test]
    fn next_snapshot_copies_committed_chain() {
        let (disk, mut header) = setup(256);
        ShadowCopyAllocator::new(&disk, &mut header, 0)
            .shadow_data_block(232)
            .unwrap();
        disk.write_new_block(2, &BlockStamp::data(1, 1, 1), &[42])
            .unwrap();
        header.write_to_file_system(&disk).unwrap();

        let mut next = header.clone_editable().unwrap();
        let copy = ShadowCopyAllocator::new(&disk, &mut next, 0)
            .shadow_data_block(232)
            .unwrap();

        assert_eq!(copy, 4);
        assert_eq!(next.files()[0].single_indirect_block(), 5);
        assert_eq!(next.files()[0].data_block_count(), 1);
        assert_eq!(next.files()[0].total_block_count(), 4);

        let mut buf = vec![0u8; disk.data_length()];
        disk.read_block(copy, &BlockStamp::data(1, 1, 2), &mut buf)
            .unwrap();
        assert_eq!(buf[0], 42);
    }

    #[test]
    fn whole_block_write_replaces_contents_and_keeps_committed_copy() {
        let (disk, mut header) = setup(256);
        ShadowCopyAllocator::new(&disk, &mut header, 0)
            .shadow_data_block(232)
            .unwrap();
        disk.write_new_block(2, &BlockStamp::data(1, 1, 1), &[42])
            .unwrap();
        header.write_to_file_system(&disk).unwrap();

        let mut next = header.clone_editable().unwrap();
        let contents = vec![7u8; disk.data_length()];
        let mut alloc = ShadowCopyAllocator::new(&disk, &mut next, 0);
        let written = alloc.write_data_block(232, &contents).unwrap();
        let rewritten = alloc.write_data_block(232, &[9]).unwrap();

        assert_eq!(written, 4);
        assert_eq!(rewritten, written);
        assert_eq!(next.files()[0].total_block_count(), 4);

        let mut buf = vec![0u8; disk.data_length()];
        disk.read_block(written, &BlockStamp::data(1, 1, 2), &mut buf)
            .unwrap();
        assert_eq!(buf[..2], [9, 0]);
        disk.read_block(2, &BlockStamp::data(1, 1, 1), &mut buf)
            .unwrap();
        assert_eq!(buf[0], 42);
    }

    #[test]
    fn committed_header_refuses_to_allocate() {
        let (disk, mut header) = setup(256);
        header.write_to_file_system(&disk).unwrap();

        let result = ShadowCopyAllocator::new(&disk, &mut header, 0).shadow_data_block(0);

        assert!(result.is_err());
    }
}
