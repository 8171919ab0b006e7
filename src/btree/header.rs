//! # Tree Header
//!
//! Node 0 of a tree's store holds the tree header. Two layouts exist:
//!
//! ## Bounded (historian trees)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ----------------------------
//! 0       16    type tag
//! 16      1     version (0)
//! 17      8     last_allocated_node
//! 25      4     node_size
//! 29      8     root_node
//! 37      1     root_level
//! 38      8     first_key
//! 46      8     last_key
//! ```
//!
//! ## Compact (generic trees)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ----------------------------
//! 0       16    type tag
//! 16      1     version (0)
//! 17      4     next_unallocated_node
//! 21      4     node_size
//! 25      4     root_node
//! 29      1     root_level
//! ```
//!
//! The compact layout does not persist key bounds; the tree recomputes them
//! from its outermost leaves when opened.
//!
//! A type tag or version mismatch on load is `StoreError::HeaderCorrupt`.

use eyre::Result;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::StoreError;

pub const TREE_HEADER_VERSION: u8 = 0;

/// {7bfa9083-701e-4596-8273-8680a739271d} in mixed-endian GUID byte order.
pub const COMPACT_TREE_TAG: [u8; 16] = [
    0x83, 0x90, 0xfa, 0x7b, 0x1e, 0x70, 0x96, 0x45, 0x82, 0x73, 0x86, 0x80, 0xa7, 0x39, 0x27, 0x1d,
];

/// {d0e6b52a-3c41-4f0e-9b7d-5a2c8e61f4a3} in mixed-endian GUID byte order.
pub const BOUNDED_TREE_TAG: [u8; 16] = [
    0x2a, 0xb5, 0xe6, 0xd0, 0x41, 0x3c, 0x0e, 0x4f, 0x9b, 0x7d, 0x5a, 0x2c, 0x8e, 0x61, 0xf4, 0xa3,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    Bounded,
    Compact,
}

/// Tree state persisted in node 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    pub last_allocated_node: u64,
    pub node_size: u32,
    pub root_node: u64,
    pub root_level: u8,
    pub first_key: u64,
    pub last_key: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct BoundedHeader {
    tag: [u8; 16],
    version: u8,
    last_allocated_node: U64,
    node_size: U32,
    root_node: U64,
    root_level: u8,
    first_key: U64,
    last_key: U64,
}

const _: () = assert!(std::mem::size_of::<BoundedHeader>() == 54);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct CompactHeader {
    tag: [u8; 16],
    version: u8,
    next_unallocated_node: U32,
    node_size: U32,
    root_node: U32,
    root_level: u8,
}

const _: () = assert!(std::mem::size_of::<CompactHeader>() == 30);

impl HeaderLayout {
    pub fn encoded_len(self) -> usize {
        match self {
            HeaderLayout::Bounded => std::mem::size_of::<BoundedHeader>(),
            HeaderLayout::Compact => std::mem::size_of::<CompactHeader>(),
        }
    }

    /// Serializes `header` into the start of `buf`.
    pub fn encode(self, header: &TreeHeader, buf: &mut [u8]) -> Result<()> {
        let len = self.encoded_len();
        eyre::ensure!(
            buf.len() >= len,
            "node of {} bytes cannot hold a {} byte tree header",
            buf.len(),
            len
        );

        match self {
            HeaderLayout::Bounded => {
                let raw = BoundedHeader {
                    tag: BOUNDED_TREE_TAG,
                    version: TREE_HEADER_VERSION,
                    last_allocated_node: U64::new(header.last_allocated_node),
                    node_size: U32::new(header.node_size),
                    root_node: U64::new(header.root_node),
                    root_level: header.root_level,
                    first_key: U64::new(header.first_key),
                    last_key: U64::new(header.last_key),
                };
                buf[..len].copy_from_slice(raw.as_bytes());
            }
            HeaderLayout::Compact => {
                let narrow = |v: u64, what: &str| {
                    u32::try_from(v)
                        .map_err(|_| eyre::eyre!("{} {} does not fit the compact header", what, v))
                };
                let raw = CompactHeader {
                    tag: COMPACT_TREE_TAG,
                    version: TREE_HEADER_VERSION,
                    next_unallocated_node: U32::new(narrow(
                        header.last_allocated_node + 1,
                        "next node",
                    )?),
                    node_size: U32::new(header.node_size),
                    root_node: U32::new(narrow(header.root_node, "root node")?),
                    root_level: header.root_level,
                };
                buf[..len].copy_from_slice(raw.as_bytes());
            }
        }
        Ok(())
    }

    /// Parses a tree header. Compact headers come back with empty key bounds.
    pub fn decode(self, buf: &[u8]) -> Result<TreeHeader> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(StoreError::header_corrupt("tree header truncated").into());
        }

        match self {
            HeaderLayout::Bounded => {
                let raw = BoundedHeader::read_from_bytes(&buf[..len])
                    .map_err(|e| eyre::eyre!("failed to read tree header: {:?}", e))?;
                check_tag(&raw.tag, &BOUNDED_TREE_TAG, raw.version)?;
                Ok(TreeHeader {
                    last_allocated_node: raw.last_allocated_node.get(),
                    node_size: raw.node_size.get(),
                    root_node: raw.root_node.get(),
                    root_level: raw.root_level,
                    first_key: raw.first_key.get(),
                    last_key: raw.last_key.get(),
                })
            }
            HeaderLayout::Compact => {
                let raw = CompactHeader::read_from_bytes(&buf[..len])
                    .map_err(|e| eyre::eyre!("failed to read tree header: {:?}", e))?;
                check_tag(&raw.tag, &COMPACT_TREE_TAG, raw.version)?;
                let next = raw.next_unallocated_node.get() as u64;
                if next == 0 {
                    return Err(StoreError::header_corrupt("next node index is zero").into());
                }
                Ok(TreeHeader {
                    last_allocated_node: next - 1,
                    node_size: raw.node_size.get(),
                    root_node: raw.root_node.get() as u64,
                    root_level: raw.root_level,
                    first_key: u64::MAX,
                    last_key: 0,
                })
            }
        }
    }
}

fn check_tag(found: &[u8; 16], expected: &[u8; 16], version: u8) -> Result<()> {
    if found != expected {
        return Err(StoreError::header_corrupt("tree type tag mismatch").into());
    }
    if version != TREE_HEADER_VERSION {
        return Err(StoreError::header_corrupt(format!(
            "unsupported tree header version {}",
            version
        ))
        .into());
    }
    Ok(())
}
