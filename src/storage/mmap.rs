//! # Memory-Mapped Container Storage
//!
//! `MmapStorage` backs a container with a single memory-mapped file. Blocks
//! are returned as slices pointing straight into the mapping, so a read never
//! copies through a user-space buffer.
//!
//! ## Safety Considerations
//!
//! A mapping becomes invalid when it is remapped during `grow()`. Rather than
//! guarding every access at runtime, the borrow checker enforces it:
//!
//! ```text
//! block(&self) -> &[u8]            // Immutable borrow of self
//! block_mut(&mut self) -> &mut [u8] // Mutable borrow of self
//! grow(&mut self)                  // Mutable borrow (exclusive)
//! ```
//!
//! No block reference can outlive a `grow()` call. Shared access from several
//! readers goes through [`DiskIo`](super::DiskIo), which wraps the storage in
//! a read/write lock.
//!
//! ## File Format
//!
//! A container file is a plain sequence of equally sized blocks:
//!
//! ```text
//! Offset 0:              Block 0 (header slot A)
//! Offset block_size:     Block 1 (header slot B)
//! Offset 2*block_size:   Block 2 (first allocatable block)
//! ...
//! ```
//!
//! The file size is always a multiple of the block size. The block size is
//! not recorded by this layer; the file header validates it on open.
//!
//! ## Platform Behavior
//!
//! - `MAP_SHARED` mapping so writes reach the file
//! - `sync()` flushes the mapping (`msync`) before returning
//! - `prefetch_blocks()` issues `madvise(MADV_WILLNEED)` on unix

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use super::{validate_block_size, Storage};

#[derive(Debug)]
pub struct MmapStorage {
    file: File,
    mmap: MmapMut,
    block_size: usize,
    block_count: u32,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        validate_block_size(block_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open container file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;

        let file_size = metadata.len();

        ensure!(
            file_size > 0,
            "cannot open empty container file '{}'",
            path.display()
        );

        ensure!(
            file_size % block_size as u64 == 0,
            "container file '{}' size {} is not a multiple of block size {}",
            path.display(),
            file_size,
            block_size
        );

        let block_count = u32::try_from(file_size / block_size as u64)
            .wrap_err_with(|| format!("container file '{}' is too large", path.display()))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can be
        // modified externally, leading to undefined behavior. This is safe because:
        // 1. The file is opened read+write by this process only
        // 2. Container files are not meant to be modified by external processes
        // 3. The mmap lifetime is tied to MmapStorage, preventing use-after-unmap
        // 4. All access goes through block()/block_mut() which bounds-check the address
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            block_size,
            block_count,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, block_size: usize, initial_blocks: u32) -> Result<Self> {
        let path = path.as_ref();
        validate_block_size(block_size)?;

        ensure!(initial_blocks > 0, "initial block count must be at least 1");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create container file '{}'", path.display()))?;

        let file_size = initial_blocks as u64 * block_size as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can be
        // modified externally. This is safe because:
        // 1. We just created this file with exclusive access (truncate=true)
        // 2. The file size is set to a valid multiple of the block size
        // 3. The mmap lifetime is tied to MmapStorage, preventing use-after-unmap
        // 4. All access goes through block()/block_mut() which bounds-check the address
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            block_size,
            block_count: initial_blocks,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }
}

impl Storage for MmapStorage {
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
        Ok(&self.mmap[offset..offset + self.block_size])
    }

    fn block_mut(&mut self, address: u32) -> Result<&mut [u8]> {
        ensure!(
            address < self.block_count,
            "block {} out of bounds (block_count={})",
            address,
            self.block_count
        );

        let offset = address as usize * self.block_size;
        Ok(&mut self.mmap[offset..offset + self.block_size])
    }

    fn grow(&mut self, new_block_count: u32) -> Result<()> {
        if new_block_count <= self.block_count {
            return Ok(());
        }

        self.mmap
            .flush()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_block_count as u64 * self.block_size as u64;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because the old mmap becomes invalid.
        // This is safe because:
        // 1. grow() requires &mut self, so no block references can exist (borrow checker)
        // 2. We flushed the old mmap above, ensuring data is written to disk
        // 3. The file was extended to new_size before remapping
        // 4. The old mmap is dropped when we assign the new one
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };

        self.block_count = new_block_count;

        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }

    fn prefetch_blocks(&self, start: u32, count: u32) {
        if start >= self.block_count {
            return;
        }

        let end = start.saturating_add(count).min(self.block_count);
        let start_offset = start as usize * self.block_size;
        let len = (end - start) as usize * self.block_size;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is only a hint to the kernel. The
        // range is valid because:
        // 1. start was bounds-checked above
        // 2. end is clamped to block_count, so the range never exceeds the mapping
        // 3. The mmap is valid for the entire file size
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }

        #[cfg(not(unix))]
        let _ = (start_offset, len);
    }
}
