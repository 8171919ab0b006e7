//! Read-only walk of a sub-file's indirection tree.
//!
//! `IndexParser` resolves a virtual offset to the physical addresses on its
//! chain as seen at a given snapshot. It never allocates; a missing pointer
//! anywhere on the chain resolves to address 0 for that level and everything
//! below it.

use eyre::Result;

use super::file_header::SubFileMetadata;
use super::index_mapper::{IndexMapper, IndexPosition};
use crate::config::ADDRESS_SIZE;
use crate::storage::{BlockFooter, BlockStamp, DiskIo, Storage, UNALLOCATED};

/// Physical addresses along one virtual block's chain. `first_indirect` is
/// the block referenced from the sub-file metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressChain {
    pub data_block: u32,
    pub first_indirect: u32,
    pub second_indirect: u32,
    pub third_indirect: u32,
}

impl AddressChain {
    pub fn indirect(&self, depth: usize) -> u32 {
        match depth {
            0 => self.first_indirect,
            1 => self.second_indirect,
            _ => self.third_indirect,
        }
    }

    fn set_indirect(&mut self, depth: usize, address: u32) {
        match depth {
            0 => self.first_indirect = address,
            1 => self.second_indirect = address,
            _ => self.third_indirect = address,
        }
    }
}

pub fn read_address(block: &[u8], slot: u32) -> u32 {
    let off = slot as usize * ADDRESS_SIZE;
    u32::from_le_bytes([block[off], block[off + 1], block[off + 2], block[off + 3]])
}

pub fn write_address(block: &mut [u8], slot: u32, address: u32) {
    let off = slot as usize * ADDRESS_SIZE;
    block[off..off + ADDRESS_SIZE].copy_from_slice(&address.to_le_bytes());
}

pub struct IndexParser<'a, S: Storage> {
    disk: &'a DiskIo<S>,
    mapper: IndexMapper,
    file: SubFileMetadata,
    snapshot: u32,
}

impl<'a, S: Storage> IndexParser<'a, S> {
    pub fn new(disk: &'a DiskIo<S>, file: &SubFileMetadata, snapshot: u32) -> Result<Self> {
        Ok(Self {
            disk,
            mapper: IndexMapper::new(disk.block_size())?,
            file: *file,
            snapshot,
        })
    }

    pub fn mapper(&self) -> &IndexMapper {
        &self.mapper
    }

    /// Reads the index block at `depth` of `position`'s chain into `buf`.
    pub fn read_index_block(
        &self,
        position: &IndexPosition,
        depth: usize,
        address: u32,
        buf: &mut [u8],
    ) -> Result<Option<BlockFooter>> {
        let expected = BlockStamp::index(
            depth as u8 + 1,
            position.covers[depth],
            self.file.file_id() as u32,
            self.snapshot,
        );
        self.disk.read_block(address, &expected, buf)
    }

    pub fn resolve_chain(&self, offset: u64) -> Result<AddressChain> {
        let position = self.mapper.map(offset)?;
        self.resolve_position(&position)
    }

    pub fn resolve_position(&self, position: &IndexPosition) -> Result<AddressChain> {
        let mut chain = AddressChain::default();
        let mut address = self.file.root_for_level(position.level);

        if position.is_direct() {
            chain.data_block = address;
            return Ok(chain);
        }

        let mut buf = vec![0u8; self.disk.data_length()];
        for depth in 0..position.level as usize {
            chain.set_indirect(depth, address);
            if address == UNALLOCATED {
                return Ok(chain);
            }
            self.read_index_block(position, depth, address, &mut buf)?;
            address = read_address(&buf, position.slots[depth]);
        }

        chain.data_block = address;
        Ok(chain)
    }

    /// Physical address of the data block holding `offset`, or 0.
    pub fn resolve(&self, offset: u64) -> Result<u32> {
        Ok(self.resolve_chain(offset)?.data_block)
    }
}
