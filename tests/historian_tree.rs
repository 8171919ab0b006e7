//! # Historian Tree Integration Tests
//!
//! Runs `SortedTree256` on top of container sub-files with small blocks so a
//! few thousand samples are enough to span many leaf splits and push node
//! indices past the single-indirect range of the sub-file.

use std::collections::BTreeMap;

use proptest::prelude::*;
use snaptree::btree::{
    BPlusTree, HeaderLayout, HistorianKey, HistorianValue, MemoryNodeStore, SortedTree256,
};
use snaptree::filesystem::{file_name, ContainerBuilder, IndexMapper};
use snaptree::StoreError;

const SMALL_BLOCKS: usize = 256;

/// Deterministic 64-bit mixer for reproducible pseudo-random keys.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn random_samples(count: usize, seed: u64) -> BTreeMap<HistorianKey, HistorianValue> {
    let mut state = seed;
    let mut samples = BTreeMap::new();
    while samples.len() < count {
        let timestamp = splitmix64(&mut state) % 1_000_000;
        let point_id = splitmix64(&mut state) % 64;
        let value = splitmix64(&mut state);
        samples.insert(
            HistorianKey::new(timestamp, point_id),
            HistorianValue::new(value, !value),
        );
    }
    samples
}

fn shuffled(samples: &BTreeMap<HistorianKey, HistorianValue>, seed: u64) -> Vec<(HistorianKey, HistorianValue)> {
    let mut records: Vec<_> = samples.iter().map(|(k, v)| (*k, *v)).collect();
    let mut state = seed;
    for i in (1..records.len()).rev() {
        let j = (splitmix64(&mut state) % (i as u64 + 1)) as usize;
        records.swap(i, j);
    }
    records
}

fn is_kind(err: &eyre::Report, expected: StoreError) -> bool {
    StoreError::of(err) == Some(&expected)
}

#[test]
fn ten_thousand_random_samples_round_trip_through_a_container() {
    let samples = random_samples(10_000, 0x5EED);
    let mut container = ContainerBuilder::new()
        .block_size(SMALL_BLOCKS)
        .create_in_memory()
        .unwrap();

    let mut edit = container.begin_edit().unwrap();
    let index = edit.create_file(file_name("points").unwrap()).unwrap();
    {
        let store = edit.open_file(index).unwrap();
        let mut tree = SortedTree256::create(store, HeaderLayout::Bounded).unwrap();
        for (key, value) in shuffled(&samples, 7) {
            tree.add(key, value).unwrap();
        }

        let mapper = IndexMapper::new(SMALL_BLOCKS).unwrap();
        assert!(tree.last_allocated_node() > mapper.first_double_indirect_block_index() as u64);
        assert!(tree.root_level() >= 2);
    }
    edit.commit().unwrap();

    let snapshot = container.snapshot();
    let tree = SortedTree256::open(snapshot.open_file(index).unwrap(), HeaderLayout::Bounded).unwrap();

    for (key, value) in &samples {
        assert_eq!(tree.get(key).unwrap(), *value);
    }

    let scanned: Vec<_> = tree.scan().unwrap().map(|r| r.unwrap()).collect();
    let expected: Vec<_> = samples.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(scanned, expected);

    let (first, last) = (samples.keys().next().unwrap(), samples.keys().last().unwrap());
    assert_eq!(tree.first_key(), first.timestamp);
    assert_eq!(tree.last_key(), last.timestamp);
}

#[test]
fn removed_keys_are_gone_and_missing_keys_fail() {
    let samples = random_samples(2_000, 42);
    let mut container = ContainerBuilder::new()
        .block_size(SMALL_BLOCKS)
        .create_in_memory()
        .unwrap();

    let mut edit = container.begin_edit().unwrap();
    let index = edit.create_file(file_name("points").unwrap()).unwrap();
    let mut tree = SortedTree256::create(edit.open_file(index).unwrap(), HeaderLayout::Bounded).unwrap();
    for (key, value) in &samples {
        tree.add(*key, *value).unwrap();
    }

    let (removed, kept): (Vec<_>, Vec<_>) = shuffled(&samples, 3)
        .into_iter()
        .enumerate()
        .partition(|(i, _)| i % 2 == 0);
    for (_, (key, _)) in &removed {
        tree.remove(key).unwrap();
    }

    for (_, (key, _)) in &removed {
        assert!(is_kind(&tree.get(key).unwrap_err(), StoreError::KeyNotFound));
        assert!(is_kind(&tree.remove(key).unwrap_err(), StoreError::KeyNotFound));
    }
    for (_, (key, value)) in &kept {
        assert_eq!(tree.get(key).unwrap(), *value);
    }
    assert_eq!(tree.scan().unwrap().count(), kept.len());
}

#[test]
fn duplicate_add_fails_and_leaves_the_tree_usable() {
    let mut container = ContainerBuilder::new()
        .block_size(SMALL_BLOCKS)
        .create_in_memory()
        .unwrap();
    let mut edit = container.begin_edit().unwrap();
    let index = edit.create_file(file_name("points").unwrap()).unwrap();
    let mut tree = SortedTree256::create(edit.open_file(index).unwrap(), HeaderLayout::Bounded).unwrap();
    let key = HistorianKey::new(100, 1);
    tree.add(key, HistorianValue::new(1, 1)).unwrap();

    let err = tree.add(key, HistorianValue::new(2, 2)).unwrap_err();

    assert!(is_kind(&err, StoreError::DuplicateKey));
    assert_eq!(tree.get(&key).unwrap(), HistorianValue::new(1, 1));
    tree.add(HistorianKey::new(100, 2), HistorianValue::new(3, 3)).unwrap();
}

#[test]
fn range_scan_respects_compound_key_order() {
    let mut tree = SortedTree256::create(MemoryNodeStore::new(SMALL_BLOCKS - 24), HeaderLayout::Bounded)
        .unwrap();
    for timestamp in 0..50u64 {
        for point_id in 0..4u64 {
            tree.add(
                HistorianKey::new(timestamp, point_id),
                HistorianValue::new(timestamp * 10 + point_id, 0),
            )
            .unwrap();
        }
    }

    let keys: Vec<HistorianKey> = tree
        .scan_range(HistorianKey::new(10, 2), HistorianKey::new(12, 1))
        .unwrap()
        .map(|r| r.unwrap().0)
        .collect();

    assert_eq!(
        keys,
        vec![
            HistorianKey::new(10, 2),
            HistorianKey::new(10, 3),
            HistorianKey::new(11, 0),
            HistorianKey::new(11, 1),
            HistorianKey::new(11, 2),
            HistorianKey::new(11, 3),
            HistorianKey::new(12, 0),
        ]
    );
}

#[test]
fn update_is_visible_after_commit() {
    let mut container = ContainerBuilder::new()
        .block_size(SMALL_BLOCKS)
        .create_in_memory()
        .unwrap();
    let key = HistorianKey::new(5, 5);

    let mut edit = container.begin_edit().unwrap();
    let index = edit.create_file(file_name("points").unwrap()).unwrap();
    let mut tree = SortedTree256::create(edit.open_file(index).unwrap(), HeaderLayout::Bounded).unwrap();
    tree.add(key, HistorianValue::new(1, 0)).unwrap();
    drop(tree);
    edit.commit().unwrap();

    let mut edit = container.begin_edit().unwrap();
    let mut tree = SortedTree256::open(edit.open_file(index).unwrap(), HeaderLayout::Bounded).unwrap();
    tree.update(&key, HistorianValue::new(2, 0)).unwrap();
    assert!(is_kind(
        &tree.update(&HistorianKey::new(6, 6), HistorianValue::default()).unwrap_err(),
        StoreError::KeyNotFound
    ));
    drop(tree);
    edit.commit().unwrap();

    let snapshot = container.snapshot();
    let tree = SortedTree256::open(snapshot.open_file(index).unwrap(), HeaderLayout::Bounded).unwrap();
    assert_eq!(tree.get(&key).unwrap(), HistorianValue::new(2, 0));
}

#[test]
fn compact_tree_recomputes_bounds_on_open() {
    let mut container = ContainerBuilder::new()
        .block_size(SMALL_BLOCKS)
        .create_in_memory()
        .unwrap();

    let mut edit = container.begin_edit().unwrap();
    let index = edit.create_file(file_name("generic").unwrap()).unwrap();
    let mut tree = BPlusTree::<u64, u64, _>::create(edit.open_file(index).unwrap(), HeaderLayout::Compact)
        .unwrap();
    for key in 100..600u64 {
        tree.add(key, key * 2).unwrap();
    }
    tree.remove(&100).unwrap();
    tree.remove(&599).unwrap();
    drop(tree);
    edit.commit().unwrap();

    let snapshot = container.snapshot();
    let tree = BPlusTree::<u64, u64, _>::open(snapshot.open_file(index).unwrap(), HeaderLayout::Compact)
        .unwrap();

    assert_eq!(tree.first_key(), 101);
    assert_eq!(tree.last_key(), 598);
    assert_eq!(tree.get(&300).unwrap(), 600);
}

#[test]
fn opening_with_the_wrong_layout_is_header_corrupt() {
    let mut tree = BPlusTree::<u64, u64, _>::create(MemoryNodeStore::new(232), HeaderLayout::Compact).unwrap();
    tree.add(1, 1).unwrap();

    let err = BPlusTree::<u64, u64, _>::open(tree.into_store(), HeaderLayout::Bounded)
        .err()
        .unwrap();

    assert!(matches!(
        StoreError::of(&err),
        Some(StoreError::HeaderCorrupt { .. })
    ));
}

#[test]
fn bulk_add_from_another_tree_scanner() {
    let mut source = SortedTree256::create(MemoryNodeStore::new(232), HeaderLayout::Bounded).unwrap();
    for (key, value) in random_samples(500, 9) {
        source.add(key, value).unwrap();
    }
    let mut target = SortedTree256::create(MemoryNodeStore::new(232), HeaderLayout::Bounded).unwrap();

    target.add_sorted(source.scan().unwrap()).unwrap();

    let copied: Vec<_> = target.scan().unwrap().map(|r| r.unwrap()).collect();
    let original: Vec<_> = source.scan().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(copied, original);
    assert_eq!(target.first_key(), source.first_key());
    assert_eq!(target.last_key(), source.last_key());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn bounds_cover_every_live_key(
        ops in prop::collection::vec((0u64..500, any::<bool>()), 1..200)
    ) {
        let mut tree = SortedTree256::create(MemoryNodeStore::new(232), HeaderLayout::Bounded).unwrap();
        let mut live = BTreeMap::new();

        for (timestamp, insert) in ops {
            let key = HistorianKey::new(timestamp, timestamp % 3);
            if insert {
                let added = tree.add(key, HistorianValue::default()).is_ok();
                prop_assert_eq!(added, live.insert(key, ()).is_none());
            } else {
                let removed = tree.remove(&key).is_ok();
                prop_assert_eq!(removed, live.remove(&key).is_some());
            }

            if live.is_empty() {
                prop_assert!(tree.is_empty());
                prop_assert_eq!(tree.root_level(), 0);
            } else {
                prop_assert!(!tree.is_empty());
                for key in live.keys() {
                    prop_assert!(tree.first_key() <= key.timestamp);
                    prop_assert!(key.timestamp <= tree.last_key());
                }
            }
        }

        let scanned: Vec<HistorianKey> = tree.scan().unwrap().map(|r| r.unwrap().0).collect();
        let expected: Vec<HistorianKey> = live.keys().copied().collect();
        prop_assert_eq!(scanned, expected);
    }

    #[test]
    fn bounds_equal_min_and_max_after_every_insert(
        samples in prop::collection::vec((any::<u64>(), 0u64..4), 1..300)
    ) {
        let mut tree = SortedTree256::create(MemoryNodeStore::new(232), HeaderLayout::Bounded).unwrap();
        let mut inserted = BTreeMap::new();

        for (timestamp, point_id) in samples {
            let key = HistorianKey::new(timestamp, point_id);
            let added = tree.add(key, HistorianValue::new(timestamp, point_id)).is_ok();
            prop_assert_eq!(added, inserted.insert(key, ()).is_none());

            let min = inserted.keys().map(|k| k.timestamp).min();
            let max = inserted.keys().map(|k| k.timestamp).max();
            prop_assert_eq!(Some(tree.first_key()), min);
            prop_assert_eq!(Some(tree.last_key()), max);
        }
    }
}
