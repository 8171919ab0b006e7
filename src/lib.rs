//! # snaptree - Shadow-Copy Block Store with a B+Tree Index
//!
//! snaptree keeps time-series samples in a single container file. A
//! container is a flat array of fixed-size blocks holding a file header and a
//! set of sub-files; each sub-file usually carries one B+Tree keyed by
//! `(timestamp, point_id)`.
//!
//! - **Copy-on-write transactions**: committed blocks are never modified. A
//!   transaction shadow-copies what it touches and becomes visible in one
//!   header write.
//! - **Crash safety without a log**: the header alternates between two slots,
//!   so a torn commit falls back to the previous snapshot.
//! - **Lock-free readers**: a read snapshot sees exactly the header it
//!   captured, regardless of later commits.
//!
//! ## Quick Start
//!
//! ```ignore
//! use snaptree::btree::{HeaderLayout, HistorianKey, HistorianValue, SortedTree256};
//! use snaptree::filesystem::{file_name, ContainerBuilder};
//!
//! let mut container = ContainerBuilder::new().create("./points.snap")?;
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
//! for record in tree.scan()? {
//!     let (key, value) = record?;
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  btree       BPlusTree / scanners    │
//! ├─────────────────────────────────────┤
//! │  filesystem  container, transactions │
//! │              shadow-copy allocator   │
//! │              header, address mapping │
//! ├─────────────────────────────────────┤
//! │  storage     DiskIo, block footers   │
//! │              memory / mmap storage   │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! block 0      header slot A (even snapshots)
//! block 1      header slot B (odd snapshots)
//! block 2..    data and index blocks, allocated monotonically
//! ```
//!
//! Every block ends in a 24-byte footer naming its type, owning sub-file,
//! position and the snapshot that wrote it, sealed with a CRC-64.
//!
//! ## Errors
//!
//! All fallible operations return `eyre::Result`. Conditions callers react to
//! (`DuplicateKey`, `KeyNotFound`, `ReadOnly`, ...) are carried as
//! [`StoreError`] inside the report; see [`error`].

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod storage;

pub use btree::{
    BPlusTree, HeaderLayout, HistorianKey, HistorianValue, MemoryNodeStore, NodeStore,
    SortedTree256, TreeKey, TreeScanner, TreeValue,
};
pub use error::StoreError;
pub use filesystem::{
    file_name, AccessMode, ContainerBuilder, ContainerFile, ReadSnapshot, TransactionEditor,
};
pub use storage::{MemoryStorage, MmapStorage, Storage};
