//! # Virtual Address Translation
//!
//! Each sub-file is a sparse sequence of virtual blocks. Virtual block `i`
//! holds bytes `[i * D, (i + 1) * D)` of the sub-file, where `D` is the data
//! length of a physical block. Physical addresses are found through a chain
//! of up to three index blocks hanging off the sub-file metadata, in the
//! style of a classic inode:
//!
//! ```text
//! virtual index         path from the sub-file metadata
//! ------------------    ------------------------------------------------
//! 0                     direct_block ─> data
//! 1 .. 1+A              single ─> [slot] ─> data
//! 1+A .. 1+A+A²         double ─> [slot] ─> [slot] ─> data
//! 1+A+A² .. last        triple ─> [slot] ─> [slot] ─> [slot] ─> data
//! ```
//!
//! `A = D / 4` is the number of 4-byte addresses one index block holds. All
//! boundaries are clamped to `i32::MAX` so virtual indices stay within a
//! signed 32-bit range regardless of block size.
//!
//! ## Index Values
//!
//! Every index block records in its footer the first virtual block index it
//! covers. The top block of a double-indirect chain therefore carries
//! `first_double`, and the block below it at slot `s` carries
//! `first_double + s * A`. Readers use this to reject a block that landed at
//! the wrong place in the tree.
//!
//! The mapper is a pure function of the block size.

use eyre::Result;

use crate::config::{ADDRESS_SIZE, BLOCK_FOOTER_LENGTH};
use crate::error::StoreError;
use crate::storage::validate_block_size;

/// Where one virtual block sits in the indirection tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPosition {
    /// Virtual block index.
    pub block_index: u32,
    /// Number of index blocks between the metadata and the data block.
    pub level: u8,
    /// Slot taken in each index block, from the top of the chain down.
    pub slots: [u32; 3],
    /// First virtual block index covered by each index block on the chain.
    pub covers: [u32; 3],
}

impl IndexPosition {
    pub fn is_direct(&self) -> bool {
        self.level == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMapper {
    data_length: u64,
    addresses_per_block: u64,
    first_double: u32,
    first_triple: u32,
    last_addressable: u32,
}

impl IndexMapper {
    pub const FIRST_SINGLE_INDIRECT_BLOCK_INDEX: u32 = 1;

    /// Derives the layout for `block_size`, which must be a supported block
    /// size.
    pub fn new(block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;

        let data_length = (block_size - BLOCK_FOOTER_LENGTH) as u64;
        let a = data_length / ADDRESS_SIZE as u64;
        let cap = i32::MAX as u64;

        let first_double = (Self::FIRST_SINGLE_INDIRECT_BLOCK_INDEX as u64 + a).min(cap);
        let first_triple = (first_double + a * a).min(cap);
        let last_addressable = (first_triple + a * a * a - 1).min(cap);

        Ok(Self {
            data_length,
            addresses_per_block: a,
            first_double: first_double as u32,
            first_triple: first_triple as u32,
            last_addressable: last_addressable as u32,
        })
    }

    pub fn data_length(&self) -> usize {
        self.data_length as usize
    }

    pub fn addresses_per_block(&self) -> u32 {
        self.addresses_per_block as u32
    }

    /// Virtual blocks covered by a double-indirect chain, `A * A`.
    pub fn addresses_per_block_square(&self) -> u64 {
        self.addresses_per_block * self.addresses_per_block
    }

    pub fn first_single_indirect_block_index(&self) -> u32 {
        Self::FIRST_SINGLE_INDIRECT_BLOCK_INDEX
    }

    pub fn first_double_indirect_block_index(&self) -> u32 {
        self.first_double
    }

    pub fn first_triple_indirect_index(&self) -> u32 {
        self.first_triple
    }

    pub fn last_addressable_block_index(&self) -> u32 {
        self.last_addressable
    }

    /// Exclusive upper bound on virtual byte offsets.
    pub fn offset_limit(&self) -> u64 {
        self.last_addressable as u64 * self.data_length
    }

    /// Translates a virtual byte offset into its position in the index tree.
    pub fn map(&self, offset: u64) -> Result<IndexPosition> {
        let limit = self.offset_limit();
        if offset >= limit {
            return Err(StoreError::AddressRangeExceeded { offset, limit }.into());
        }

        let index = (offset / self.data_length) as u32;
        Ok(self.position_of(index))
    }

    fn position_of(&self, index: u32) -> IndexPosition {
        let a = self.addresses_per_block;
        let mut position = IndexPosition {
            block_index: index,
            level: 0,
            slots: [0; 3],
            covers: [0; 3],
        };

        if index < Self::FIRST_SINGLE_INDIRECT_BLOCK_INDEX {
            return position;
        }

        if index < self.first_double {
            position.level = 1;
            position.slots[0] = index - Self::FIRST_SINGLE_INDIRECT_BLOCK_INDEX;
            position.covers[0] = Self::FIRST_SINGLE_INDIRECT_BLOCK_INDEX;
            return position;
        }

        if index < self.first_triple {
            let rel = (index - self.first_double) as u64;
            let s1 = rel / a;
            position.level = 2;
            position.slots = [s1 as u32, (rel % a) as u32, 0];
            position.covers[0] = self.first_double;
            position.covers[1] = (self.first_double as u64 + s1 * a) as u32;
            return position;
        }

        let rel = (index - self.first_triple) as u64;
        let s1 = rel / (a * a);
        let s2 = (rel / a) % a;
        let base = self.first_triple as u64;
        position.level = 3;
        position.slots = [s1 as u32, s2 as u32, (rel % a) as u32];
        position.covers = [
            self.first_triple,
            (base + s1 * a * a) as u32,
            (base + s1 * a * a + s2 * a) as u32,
        ];
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn constants_for_4096_byte_blocks() {
        let mapper = IndexMapper::new(4096).unwrap();

        assert_eq!(mapper.data_length(), 4072);
        assert_eq!(mapper.addresses_per_block(), 1018);
        assert_eq!(mapper.first_double_indirect_block_index(), 1019);
        assert_eq!(mapper.first_triple_indirect_index(), 1019 + 1018 * 1018);
        assert_eq!(
            mapper.last_addressable_block_index() as u64,
            1019 + 1018 * 1018 + 1018u64.pow(3) - 1
        );
    }

    #[test]
    fn square_matches_double_indirect_span() {
        let mapper = IndexMapper::new(4096).unwrap();

        assert_eq!(mapper.addresses_per_block_square(), 1018 * 1018);
        assert_eq!(
            (mapper.first_triple_indirect_index() - mapper.first_double_indirect_block_index()) as u64,
            mapper.addresses_per_block_square()
        );
    }

    #[test]
    fn unsupported_block_sizes_are_rejected() {
        assert!(IndexMapper::new(0).is_err());
        assert!(IndexMapper::new(16).is_err());
        assert!(IndexMapper::new(1000).is_err());
        assert!(IndexMapper::new(1 << 17).is_err());
    }

    #[test]
    fn large_blocks_clamp_to_i32_max() {
        let mapper = IndexMapper::new(65536).unwrap();

        assert_eq!(mapper.last_addressable_block_index(), i32::MAX as u32);
        assert!(mapper.first_triple_indirect_index() < i32::MAX as u32);
    }

    #[test]
    fn offset_zero_is_direct() {
        let mapper = IndexMapper::new(4096).unwrap();

        let pos = mapper.map(0).unwrap();

        assert!(pos.is_direct());
        assert_eq!(pos.block_index, 0);
    }

    #[test]
    fn one_data_length_is_first_single_indirect() {
        let mapper = IndexMapper::new(4096).unwrap();

        let pos = mapper.map(4072).unwrap();

        assert_eq!(pos.level, 1);
        assert_eq!(pos.slots[0], 0);
        assert_eq!(pos.covers[0], 1);
    }

    #[test]
    fn index_1019_is_first_double_indirect() {
        let mapper = IndexMapper::new(4096).unwrap();

        let pos = mapper.map(1019 * 4072).unwrap();

        assert_eq!(pos.level, 2);
        assert_eq!(&pos.slots[..2], &[0, 0]);
        assert_eq!(&pos.covers[..2], &[1019, 1019]);
    }

    #[test]
    fn triple_indirect_slots_and_covers() {
        let mapper = IndexMapper::new(4096).unwrap();
        let a = 1018u32;
        let index = mapper.first_triple_indirect_index() + 2 * a * a + 3 * a + 4;

        let pos = mapper.map(index as u64 * 4072).unwrap();

        assert_eq!(pos.level, 3);
        assert_eq!(pos.slots, [2, 3, 4]);
        let base = mapper.first_triple_indirect_index();
        assert_eq!(pos.covers, [base, base + 2 * a * a, base + 2 * a * a + 3 * a]);
    }

    #[test]
    fn offset_at_limit_is_rejected() {
        let mapper = IndexMapper::new(4096).unwrap();

        let err = mapper.map(mapper.offset_limit()).unwrap_err();

        assert!(matches!(
            StoreError::of(&err),
            Some(StoreError::AddressRangeExceeded { .. })
        ));
        assert!(mapper.map(mapper.offset_limit() - 1).is_ok());
    }

    proptest! {
        #[test]
        fn thresholds_strictly_increase(shift in 8u32..=16) {
            let block_size = 1usize << shift;
            let mapper = IndexMapper::new(block_size).unwrap();
            let a = mapper.addresses_per_block();

            prop_assert_eq!(a as usize, (block_size - BLOCK_FOOTER_LENGTH) / ADDRESS_SIZE);
            prop_assert_eq!(mapper.first_double_indirect_block_index(), 1 + a);
            prop_assert!(mapper.first_single_indirect_block_index() < mapper.first_double_indirect_block_index());
            prop_assert!(mapper.first_double_indirect_block_index() < mapper.first_triple_indirect_index());
            prop_assert!(mapper.first_triple_indirect_index() < mapper.last_addressable_block_index());
            prop_assert!(mapper.last_addressable_block_index() <= i32::MAX as u32);
        }

        #[test]
        fn slots_reconstruct_block_index(
            shift in 8u32..=16,
            fraction in 0.0f64..1.0,
        ) {
            let mapper = IndexMapper::new(1usize << shift).unwrap();
            let index = (fraction * mapper.last_addressable_block_index() as f64) as u32;
            let a = mapper.addresses_per_block() as u64;

            let pos = mapper.map(index as u64 * mapper.data_length() as u64).unwrap();

            let rebuilt = match pos.level {
                0 => 0,
                1 => 1 + pos.slots[0] as u64,
                2 => mapper.first_double_indirect_block_index() as u64
                    + pos.slots[0] as u64 * a
                    + pos.slots[1] as u64,
                _ => mapper.first_triple_indirect_index() as u64
                    + pos.slots[0] as u64 * a * a
                    + pos.slots[1] as u64 * a
                    + pos.slots[2] as u64,
            };
            prop_assert_eq!(rebuilt, index as u64);
            for depth in 0..pos.level as usize {
                prop_assert!((pos.slots[depth] as u64) < a);
            }
        }
    }
}
