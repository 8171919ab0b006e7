//! In-memory block storage.
//!
//! `MemoryStorage` keeps every block in one contiguous `Vec<u8>`. It is used
//! for transient containers and in tests. Cloning it captures the exact bytes
//! present at that moment, which is how tests simulate a process dying
//! between two writes.

use eyre::{ensure, Result};

use super::{validate_block_size, Storage};

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Vec<u8>,
    block_size: usize,
    block_count: u32,
}

impl MemoryStorage {
    pub fn new(block_size: usize, initial_blocks: u32) -> Result<Self> {
        validate_block_size(block_size)?;

        Ok(Self {
            data: vec![0u8; block_size * initial_blocks as usize],
            block_size,
            block_count: initial_blocks,
        })
    }
}

impl Storage for MemoryStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn block(&self, address: u32) -> Result<&[u8]> {
        ensure!(
            address < self.block_count,
            "block {} out of bounds (block_count={})",
            address,
            self.block_count
        );

        let offset = address as usize * self.block_size;
        Ok(&self.data[offset..offset + self.block_size])
    }

    fn block_mut(&mut self, address: u32) -> Result<&mut [u8]> {
        ensure!(
            address < self.block_count,
            "block {} out of bounds (block_count={})",
            address,
            self.block_count
        );

        let offset = address as usize * self.block_size;
        Ok(&mut self.data[offset..offset + self.block_size])
    }

    fn grow(&mut self, new_block_count: u32) -> Result<()> {
        if new_block_count <= self.block_count {
            return Ok(());
        }

        self.data
            .resize(new_block_count as usize * self.block_size, 0);
        self.block_count = new_block_count;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
