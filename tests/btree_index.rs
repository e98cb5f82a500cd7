//! # B-Tree Index Tests
//!
//! Ordering, balance and duplicate handling of the on-disk B-tree, driven
//! through the public API on real files.

use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use typhoon::btree::{BTree, BTreeConfig};
use typhoon::keys::KeyComparator;
use typhoon::storage::FileKind;
use typhoon::{DbError, FieldType, HandleCache, RecordNo, ResultExt};

fn int_key(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

fn open_tree(dir: &TempDir, name: &str, dups: bool) -> (Arc<HandleCache>, BTree) {
    let cache = HandleCache::new(4).unwrap();
    let file = cache.register(dir.path().join(name), FileKind::Index, false).unwrap();
    let config = BTreeConfig::new(4, KeyComparator::Basic(FieldType::Int))
        .node_size(512)
        .dups(dups);
    let tree = BTree::open(file, config).unwrap();
    (cache, tree)
}

/// Deterministic permutation of `0..n` (multiplicative step coprime to n).
fn shuffled(n: i32) -> Vec<i32> {
    (0..n).map(|i| (i * 7919 + 13) % n).collect()
}

#[test]
fn order_42_tree_of_100_keys() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);
    assert_eq!(tree.order(), 42);

    for k in 1..=100 {
        tree.add(&int_key(k), RecordNo::new(k as u32)).unwrap();
    }

    assert!(tree.depth().unwrap() >= 2);
    assert_eq!(tree.first().unwrap(), RecordNo::new(1));
    assert_eq!(tree.current_key().unwrap(), &int_key(1));
    for expected in 2..=100 {
        assert_eq!(tree.next().unwrap(), RecordNo::new(expected));
    }
    assert_eq!(tree.current_key().unwrap(), &int_key(100));
    assert_eq!(tree.next().db_error(), Some(DbError::NotFound));
    assert_eq!(tree.last().unwrap(), RecordNo::new(100));
}

#[test]
fn traversal_is_sorted_after_unordered_inserts() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);
    let keys = shuffled(1000);

    for &k in &keys {
        tree.add(&int_key(k - 500), RecordNo::new(k as u32 + 1)).unwrap();
    }

    let current = |tree: &BTree| i32::from_le_bytes(tree.current_key().unwrap().try_into().unwrap());
    tree.first().unwrap();
    let mut seen = vec![current(&tree)];
    while tree.next().optional().unwrap().is_some() {
        seen.push(current(&tree));
    }

    assert_eq!(seen.len(), 1000);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(tree.key_count().unwrap(), 1000);
}

#[test]
fn backward_traversal_mirrors_forward() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);
    for &k in &shuffled(300) {
        tree.add(&int_key(k), RecordNo::new(k as u32 + 1)).unwrap();
    }

    let mut refs = vec![tree.last().unwrap()];
    while let Some(r) = tree.prev().optional().unwrap() {
        refs.push(r);
    }

    let expected: Vec<RecordNo> = (1..=300).rev().map(RecordNo::new).collect();
    assert_eq!(refs, expected);
}

#[test]
fn add_find_delete_round_trip() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);

    tree.add(&int_key(5), RecordNo::new(50)).unwrap();
    assert_eq!(tree.find(&int_key(5)).unwrap(), RecordNo::new(50));

    tree.delete(&int_key(5), RecordNo::new(50)).unwrap();
    assert_eq!(tree.find(&int_key(5)).db_error(), Some(DbError::NotFound));
    assert_eq!(tree.first().db_error(), Some(DbError::NotFound));
}

#[test]
fn duplicates_come_back_in_insertion_order() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "dups.key", true);

    tree.add(&int_key(1), RecordNo::new(100)).unwrap();
    for r in [11, 12, 13] {
        tree.add(&int_key(7), RecordNo::new(r)).unwrap();
    }
    tree.add(&int_key(9), RecordNo::new(200)).unwrap();

    assert_eq!(tree.find(&int_key(7)).unwrap(), RecordNo::new(11));
    assert_eq!(tree.next().unwrap(), RecordNo::new(12));
    assert_eq!(tree.next().unwrap(), RecordNo::new(13));
    assert_eq!(tree.next().unwrap(), RecordNo::new(200));
}

#[test]
fn many_duplicates_across_splits_keep_insertion_order() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "dups.key", true);

    for r in 1..=200u32 {
        tree.add(&int_key((r % 3) as i32), RecordNo::new(r)).unwrap();
    }

    let mut ones = vec![tree.find(&int_key(1)).unwrap()];
    while let Some(r) = tree.next().optional().unwrap() {
        if tree.current_key().unwrap() != int_key(1) {
            break;
        }
        ones.push(r);
    }
    let expected: Vec<RecordNo> = (1..=200u32).filter(|r| r % 3 == 1).map(RecordNo::new).collect();
    assert_eq!(ones, expected);
    tree.check().unwrap();
}

#[test]
fn delete_picks_the_duplicate_by_reference() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "dups.key", true);
    for r in [1, 2, 3] {
        tree.add(&int_key(4), RecordNo::new(r)).unwrap();
    }

    tree.delete(&int_key(4), RecordNo::new(2)).unwrap();

    assert_eq!(tree.find(&int_key(4)).unwrap(), RecordNo::new(1));
    assert_eq!(tree.next().unwrap(), RecordNo::new(3));
    assert_eq!(tree.next().db_error(), Some(DbError::NotFound));
    assert_eq!(
        tree.delete(&int_key(4), RecordNo::new(2)).db_error(),
        Some(DbError::NotFound)
    );
}

#[test]
fn balance_holds_through_adds_and_deletes() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);
    let keys = shuffled(2000);

    for &k in &keys {
        tree.add(&int_key(k), RecordNo::new(k as u32 + 1)).unwrap();
    }
    let grown = tree.check().unwrap();
    assert_eq!(grown.keys, 2000);

    for &k in keys.iter().filter(|&&k| k % 4 != 0) {
        tree.delete(&int_key(k), RecordNo::new(k as u32 + 1)).unwrap();
    }
    let shrunk = tree.check().unwrap();
    assert_eq!(shrunk.keys, 500);
    assert!(shrunk.depth <= grown.depth);

    for &k in keys.iter().filter(|&&k| k % 4 == 0) {
        assert_eq!(tree.find(&int_key(k)).unwrap(), RecordNo::new(k as u32 + 1));
    }
    assert_eq!(tree.find(&int_key(1)).db_error(), Some(DbError::NotFound));
}

#[test]
fn failed_find_positions_between_neighbours() {
    let dir = tempdir().unwrap();
    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);
    for k in (0..200).step_by(10) {
        tree.add(&int_key(k), RecordNo::new(k as u32 + 1)).unwrap();
    }

    assert_eq!(tree.find(&int_key(55)).db_error(), Some(DbError::NotFound));
    assert_eq!(tree.next().unwrap(), RecordNo::new(61));

    assert_eq!(tree.find(&int_key(55)).db_error(), Some(DbError::NotFound));
    assert_eq!(tree.prev().unwrap(), RecordNo::new(51));
}

#[test]
fn reopened_index_keeps_keys_and_geometry() {
    let dir = tempdir().unwrap();
    {
        let (_cache, mut tree) = open_tree(&dir, "ints.key", false);
        for k in 0..150 {
            tree.add(&int_key(k), RecordNo::new(k as u32 + 1)).unwrap();
        }
    }

    let (_cache, mut tree) = open_tree(&dir, "ints.key", false);

    assert_eq!(tree.key_count().unwrap(), 150);
    assert_eq!(tree.find(&int_key(149)).unwrap(), RecordNo::new(150));
    assert_eq!(tree.check().unwrap().keys, 150);
}
