//! # Filesystem Module
//!
//! A copy-on-write virtual file system over the block layer. Each sub-file is
//! a sparse sequence of data blocks reached through a direct pointer and up
//! to three levels of indirect index blocks, all rooted in the container's
//! file header.
//!
//! ## Write Path
//!
//! ```text
//! TransactionEditor::open_file ──> SubFileWriter::write_node
//!                                        │
//!                                        ▼
//!                          ShadowCopyAllocator::write_data_block
//!                            IndexMapper::map(offset)
//!                            IndexParser reads the current chain
//!                            DiskIo::write_new_block(address, stamp, node)
//!                            copy index blocks into the new snapshot
//!                            update the sub-file root pointer
//! ```
//!
//! Nothing written by a transaction is reachable until `commit` writes the
//! new header into its slot. Committed blocks are never modified, which is
//! what lets read snapshots run alongside a writer without locks on the data.
//!
//! ## Module Organization
//!
//! - `index_mapper`: pure offset to index-chain arithmetic
//! - `index_parser`: chain resolution against a snapshot
//! - `shadow_copy`: the copy-on-write allocator
//! - `file_header`: header slots and the sub-file directory
//! - `sub_file`: sub-files as tree node stores
//! - `transaction`: write transactions and read snapshots
//! - `container`: container handle and builder

mod container;
mod file_header;
mod index_mapper;
mod index_parser;
mod shadow_copy;
mod sub_file;
mod transaction;

pub use container::{ContainerBuilder, ContainerFile};
pub use file_header::{
    file_name, peek_block_size, AccessMode, FileHeaderBlock, OpenMode, SubFileMetadata,
    HEADER_MAGIC, HEADER_VERSION,
};
pub use index_mapper::{IndexMapper, IndexPosition};
pub use index_parser::{AddressChain, IndexParser};
pub use shadow_copy::ShadowCopyAllocator;
pub use sub_file::{SubFileReader, SubFileWriter};
pub use transaction::{ReadSnapshot, TransactionEditor};
