//! # snaptree Configuration Constants
//!
//! This module centralizes the numeric constants that define the on-disk
//! format. Constants that depend on each other are co-located and their
//! relationships are enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_BLOCK_SIZE (4096 bytes)
//!       │
//!       ├─> BLOCK_FOOTER_LENGTH (24 bytes, fixed)
//!       │     Trailing bytes of every block: type, level, position,
//!       │     owner file id, snapshot sequence number, checksum.
//!       │
//!       ├─> block data length (derived: block size - footer)
//!       │     Usable bytes per block. Also the B+Tree node size.
//!       │
//!       └─> ADDRESS_SIZE (4 bytes)
//!             Addresses per indirect block = data length / ADDRESS_SIZE.
//!             This fixes the maximum addressable sub-file size.
//!
//! HEADER_SLOT_COUNT (2)
//!       │
//!       └─> FIRST_ALLOCATABLE_BLOCK (must equal HEADER_SLOT_COUNT)
//!             Blocks 0 and 1 hold the alternating file header copies.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `MIN_BLOCK_SIZE` leaves room for a footer and at least a few tree
//!    entries per node.
//! 2. `FIRST_ALLOCATABLE_BLOCK == HEADER_SLOT_COUNT` (header slots are never
//!    handed out by the allocator).
//! 3. `DEFAULT_BLOCK_SIZE` lies within `[MIN_BLOCK_SIZE, MAX_BLOCK_SIZE]`.

// ============================================================================
// BLOCK LAYOUT CONSTANTS
// ============================================================================

/// Default size of one physical block in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Smallest supported block size. Small blocks are mostly useful in tests
/// that need to cross indirect-address boundaries quickly.
pub const MIN_BLOCK_SIZE: usize = 256;

/// Largest supported block size.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Number of trailing bytes reserved in every block for the footer.
pub const BLOCK_FOOTER_LENGTH: usize = 24;

/// Size of one physical block address stored in an indirect block.
pub const ADDRESS_SIZE: usize = 4;

const _: () = assert!(
    MIN_BLOCK_SIZE > BLOCK_FOOTER_LENGTH * 4,
    "MIN_BLOCK_SIZE must leave room for block data"
);

const _: () = assert!(
    DEFAULT_BLOCK_SIZE >= MIN_BLOCK_SIZE && DEFAULT_BLOCK_SIZE <= MAX_BLOCK_SIZE,
    "DEFAULT_BLOCK_SIZE out of the supported range"
);

const _: () = assert!(
    DEFAULT_BLOCK_SIZE.is_power_of_two(),
    "DEFAULT_BLOCK_SIZE must be a power of two"
);

// ============================================================================
// FILE HEADER CONSTANTS
// ============================================================================

/// Number of fixed header slots at the start of the container. Snapshot `N`
/// is committed into slot `N % HEADER_SLOT_COUNT`.
pub const HEADER_SLOT_COUNT: u32 = 2;

/// First block address the shadow-copy allocator may hand out.
pub const FIRST_ALLOCATABLE_BLOCK: u32 = 2;

const _: () = assert!(
    FIRST_ALLOCATABLE_BLOCK == HEADER_SLOT_COUNT,
    "header slots must not overlap allocatable blocks"
);

/// Number of blocks a fresh container file is created with.
pub const DEFAULT_INITIAL_BLOCKS: u32 = 16;

// ============================================================================
// B+TREE CONSTANTS
// ============================================================================

/// Maximum depth of a B+Tree. Path stacks are sized to this so descents do
/// not heap-allocate.
pub const MAX_TREE_DEPTH: usize = 16;

/// Size of the header at the start of every B+Tree node.
pub const NODE_HEADER_SIZE: usize = 16;

/// Node index holding the tree header. Node 0 is never a tree node.
pub const TREE_HEADER_NODE: u64 = 0;

/// Size of a child pointer in an internal node.
pub const CHILD_POINTER_SIZE: usize = 8;
