//! # Shadow-Copy Allocator Tests
//!
//! Exercises the allocator through the public filesystem API the way a
//! transaction does: open the committed header, clone it editable, shadow a
//! few virtual offsets, write the data blocks and commit.
//!
//! Three sub-files are written in turn, twice, so every pass has to copy the
//! previous pass's blocks into a new snapshot instead of reusing them.

use snaptree::filesystem::{
    file_name, AccessMode, FileHeaderBlock, IndexMapper, IndexParser, OpenMode,
    ShadowCopyAllocator,
};
use snaptree::storage::{BlockStamp, DiskIo, MemoryStorage};

const BLOCK_SIZE: usize = 4096;

fn write_pass(disk: &DiskIo<MemoryStorage>, file_index: usize) {
    let committed = FileHeaderBlock::open(disk, OpenMode::Open, AccessMode::ReadWrite).unwrap();
    let mut header = committed.clone_editable().unwrap();
    let mapper = IndexMapper::new(BLOCK_SIZE).unwrap();
    let data_length = mapper.data_length() as u64;
    let next = header.last_allocated_block() + 1;
    let block = vec![0u8; mapper.data_length()];

    let direct = ShadowCopyAllocator::new(disk, &mut header, file_index)
        .shadow_data_block(0)
        .unwrap();
    assert_eq!(direct, next);
    assert_eq!(header.file(file_index).unwrap().direct_block(), next);

    // Same data block: already owned by this snapshot.
    let again = ShadowCopyAllocator::new(disk, &mut header, file_index)
        .shadow_data_block(1024)
        .unwrap();
    assert_eq!(again, next);
    assert_eq!(header.file(file_index).unwrap().direct_block(), next);

    let triple_offset = mapper.first_triple_indirect_index() as u64 * data_length;
    ShadowCopyAllocator::new(disk, &mut header, file_index)
        .shadow_data_block(triple_offset)
        .unwrap();

    let file = *header.file(file_index).unwrap();
    let parser = IndexParser::new(disk, &file, header.snapshot_sequence_number()).unwrap();
    let chain = parser.resolve_chain(triple_offset).unwrap();
    assert_eq!(file.direct_block(), next);
    assert_eq!(chain.data_block, next + 1);
    assert_eq!(chain.first_indirect, next + 4);
    assert_eq!(chain.second_indirect, next + 3);
    assert_eq!(chain.third_indirect, next + 2);

    let stamp = BlockStamp::data(
        mapper.first_triple_indirect_index(),
        file.file_id() as u32,
        header.snapshot_sequence_number(),
    );
    disk.write_new_block(chain.data_block, &stamp, &block).unwrap();

    header.write_to_file_system(disk).unwrap();
}

#[test]
fn alternating_files_shadow_copy_every_pass() {
    let disk = DiskIo::new(MemoryStorage::new(BLOCK_SIZE, 4).unwrap());
    let created = FileHeaderBlock::open(&disk, OpenMode::Create, AccessMode::ReadWrite).unwrap();
    let mut header = created.clone_editable().unwrap();
    for name in ["points-a", "points-b", "points-c"] {
        header.create_new_file(file_name(name).unwrap()).unwrap();
    }
    header.write_to_file_system(&disk).unwrap();

    for file_index in [0, 1, 2, 0, 1, 2] {
        write_pass(&disk, file_index);
    }

    let reopened = FileHeaderBlock::open(&disk, OpenMode::Open, AccessMode::ReadOnly).unwrap();
    assert_eq!(reopened.snapshot_sequence_number(), 7);
    assert_eq!(reopened.last_allocated_block(), 1 + 6 * 5);
    for file in reopened.files() {
        assert_eq!(file.total_block_count(), 10);
        assert_eq!(file.data_block_count(), 2);
    }
}

#[test]
fn older_snapshot_still_resolves_its_own_blocks() {
    let disk = DiskIo::new(MemoryStorage::new(BLOCK_SIZE, 4).unwrap());
    let created = FileHeaderBlock::open(&disk, OpenMode::Create, AccessMode::ReadWrite).unwrap();
    let mut header = created.clone_editable().unwrap();
    header.create_new_file(file_name("points").unwrap()).unwrap();
    header.write_to_file_system(&disk).unwrap();

    write_pass(&disk, 0);
    let first = FileHeaderBlock::open(&disk, OpenMode::Open, AccessMode::ReadOnly).unwrap();
    write_pass(&disk, 0);
    let second = FileHeaderBlock::open(&disk, OpenMode::Open, AccessMode::ReadOnly).unwrap();

    let old = IndexParser::new(&disk, first.file(0).unwrap(), first.snapshot_sequence_number()).unwrap();
    let new = IndexParser::new(&disk, second.file(0).unwrap(), second.snapshot_sequence_number()).unwrap();

    assert_ne!(old.resolve(0).unwrap(), new.resolve(0).unwrap());
    assert_eq!(old.resolve(0).unwrap(), 2);
}
