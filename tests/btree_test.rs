use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use pagedb::common::{
    BPlusTreeConfig, BufferPoolConfig, DbError, PageId, RecordId, ReplacerPolicy, SlotId,
    StorageConfig, RESERVED_PAGE_COUNT,
};
use pagedb::index::{BPlusTree, BytewiseComparator, IntegerComparator};
use pagedb::storage::page::{BTreeInternalPage, BTreeLeafPage, MAX_INDEX_ROOTS};
use pagedb::StorageEngine;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::NamedTempFile;

fn key(i: i32) -> [u8; 4] {
    i.to_le_bytes()
}

fn decode(key: &[u8]) -> i32 {
    i32::from_le_bytes([key[0], key[1], key[2], key[3]])
}

fn rid(i: i32) -> RecordId {
    RecordId::new(PageId::new(i as u32), SlotId::new((i % 100) as u16))
}

fn small_tree_config() -> BPlusTreeConfig {
    BPlusTreeConfig::new(4)
        .with_leaf_max_size(4)
        .with_internal_max_size(4)
}

fn open_engine(path: &Path, pool_size: usize) -> StorageEngine {
    let config = StorageConfig {
        buffer_pool: BufferPoolConfig {
            pool_size,
            policy: ReplacerPolicy::Lru,
        },
        max_pages: None,
    };
    StorageEngine::open(path, config).unwrap()
}

fn open_engine_with_ceiling(path: &Path, max_pages: u32) -> StorageEngine {
    let config = StorageConfig {
        buffer_pool: BufferPoolConfig {
            pool_size: 16,
            policy: ReplacerPolicy::Lru,
        },
        max_pages: Some(max_pages),
    };
    StorageEngine::open(path, config).unwrap()
}

fn open_tree(engine: &StorageEngine, index_id: u32, config: BPlusTreeConfig) -> BPlusTree {
    engine
        .open_index(index_id, Arc::new(IntegerComparator), config)
        .unwrap()
}

fn collect_keys(tree: &BPlusTree) -> Vec<i32> {
    tree.begin()
        .unwrap()
        .map(|entry| decode(&entry.unwrap().0))
        .collect()
}

#[test]
fn test_btree_empty() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), None);
    assert_eq!(tree.get_value(&key(1)).unwrap(), None);
    assert!(!tree.remove(&key(1)).unwrap());
    assert!(tree.begin().unwrap() == tree.end());
    assert_eq!(tree.begin().unwrap().count(), 0);
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_insert_and_search() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, BPlusTreeConfig::default());

    assert!(tree.insert(&key(10), rid(10)).unwrap());
    assert!(tree.insert(&key(20), rid(20)).unwrap());
    assert!(tree.insert(&key(30), rid(30)).unwrap());

    assert!(!tree.is_empty());
    assert_eq!(tree.get_value(&key(10)).unwrap(), Some(rid(10)));
    assert_eq!(tree.get_value(&key(20)).unwrap(), Some(rid(20)));
    assert_eq!(tree.get_value(&key(30)).unwrap(), Some(rid(30)));
    assert_eq!(tree.get_value(&key(40)).unwrap(), None);
    assert_eq!(tree.get_value(&key(15)).unwrap(), None);
}

#[test]
fn test_btree_duplicate_rejected() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for i in 0..20 {
        assert!(tree.insert(&key(i), rid(i)).unwrap());
    }
    let root = tree.root_page_id();
    let pages = engine.disk_manager().num_allocated_pages();

    assert!(!tree.insert(&key(7), rid(99)).unwrap());
    assert_eq!(tree.get_value(&key(7)).unwrap(), Some(rid(7)));
    assert_eq!(tree.root_page_id(), root);
    assert_eq!(engine.disk_manager().num_allocated_pages(), pages);
    assert_eq!(collect_keys(&tree), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_btree_key_size_checked() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    assert!(matches!(
        tree.insert(&[1, 2, 3], rid(1)),
        Err(DbError::KeySizeMismatch {
            expected: 4,
            actual: 3
        })
    ));
    assert!(matches!(
        tree.get_value(&[0u8; 8]),
        Err(DbError::KeySizeMismatch { .. })
    ));
    assert!(tree.is_empty());
}

#[test]
fn test_btree_invalid_config_rejected() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);

    let config = BPlusTreeConfig::new(4).with_leaf_max_size(1);
    assert!(matches!(
        engine.open_index(1, Arc::new(IntegerComparator), config),
        Err(DbError::InvalidConfig(_))
    ));

    let config = BPlusTreeConfig::new(4).with_internal_max_size(100_000);
    assert!(matches!(
        engine.open_index(1, Arc::new(IntegerComparator), config),
        Err(DbError::InvalidConfig(_))
    ));
}

#[test]
fn test_btree_leaf_split() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());
    let bpm = engine.buffer_pool();

    for i in 1..=4 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    let first_root = tree.root_page_id().unwrap();
    {
        let guard = bpm.read_page(first_root).unwrap();
        assert_eq!(BTreeLeafPage::new(guard.data()).unwrap().size(), 4);
    }

    tree.insert(&key(5), rid(5)).unwrap();
    let root = tree.root_page_id().unwrap();
    assert_ne!(root, first_root);

    let (left, right, separator) = {
        let guard = bpm.read_page(root).unwrap();
        let page = BTreeInternalPage::new(guard.data()).unwrap();
        assert!(page.is_root());
        assert_eq!(page.size(), 2);
        (page.value_at(0), page.value_at(1), decode(page.key_at(1)))
    };
    assert_eq!(left, first_root);
    assert_eq!(separator, 3);

    let guard = bpm.read_page(left).unwrap();
    let left_leaf = BTreeLeafPage::new(guard.data()).unwrap();
    assert_eq!(left_leaf.size(), 2);
    assert_eq!(left_leaf.parent_page_id(), Some(root));
    assert_eq!(left_leaf.next_page_id(), Some(right));
    assert!(left_leaf.size() >= left_leaf.min_size());
    drop(guard);

    let guard = bpm.read_page(right).unwrap();
    let right_leaf = BTreeLeafPage::new(guard.data()).unwrap();
    assert_eq!(right_leaf.size(), 3);
    assert_eq!(decode(right_leaf.key_at(0)), 3);
    assert_eq!(right_leaf.next_page_id(), None);
    drop(guard);

    tree.verify_integrity().unwrap();
    assert!(bpm.check_all_unpinned());
}

#[test]
fn test_btree_random_insert() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 32);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    let mut keys: Vec<i32> = (0..1000).collect();
    keys.shuffle(&mut rand::thread_rng());

    for &k in &keys {
        assert!(tree.insert(&key(k), rid(k)).unwrap());
    }
    tree.verify_integrity().unwrap();

    for k in 0..1000 {
        assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)));
    }
    for k in [-1, 1000, 5000, i32::MIN, i32::MAX] {
        assert_eq!(tree.get_value(&key(k)).unwrap(), None);
    }

    assert_eq!(collect_keys(&tree), (0..1000).collect::<Vec<_>>());
    assert!(engine.buffer_pool().check_all_unpinned());
}

#[test]
fn test_btree_large_fanout_insert() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 64);
    let mut tree = open_tree(&engine, 1, BPlusTreeConfig::default());

    let mut rng = StdRng::seed_from_u64(42);
    let mut keys: Vec<i32> = (-5000..5000).collect();
    keys.shuffle(&mut rng);

    for &k in &keys {
        assert!(tree.insert(&key(k), rid(k)).unwrap());
    }
    tree.verify_integrity().unwrap();
    assert_eq!(collect_keys(&tree), (-5000..5000).collect::<Vec<_>>());
}

#[test]
fn test_btree_small_pool_deep_tree() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 8);
    let config = BPlusTreeConfig::new(4)
        .with_leaf_max_size(2)
        .with_internal_max_size(3);
    let mut tree = open_tree(&engine, 1, config);

    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i32> = (0..300).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        tree.insert(&key(k), rid(k)).unwrap();
    }
    tree.verify_integrity().unwrap();

    keys.shuffle(&mut rng);
    for &k in &keys[..200] {
        assert!(tree.remove(&key(k)).unwrap());
    }
    tree.verify_integrity().unwrap();

    let mut expected: Vec<i32> = keys[200..].to_vec();
    expected.sort();
    assert_eq!(collect_keys(&tree), expected);
    assert!(engine.buffer_pool().check_all_unpinned());
}

#[test]
fn test_btree_remove_with_merge_and_redistribute() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 32);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    let mut rng = StdRng::seed_from_u64(1234);
    let mut keys: Vec<i32> = (0..400).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    keys.shuffle(&mut rng);
    let (removed, kept) = keys.split_at(250);
    for (n, &k) in removed.iter().enumerate() {
        assert!(tree.remove(&key(k)).unwrap());
        assert!(!tree.remove(&key(k)).unwrap());
        if n % 25 == 0 {
            tree.verify_integrity().unwrap();
        }
    }
    tree.verify_integrity().unwrap();

    for &k in removed {
        assert_eq!(tree.get_value(&key(k)).unwrap(), None);
    }
    for &k in kept {
        assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)));
    }

    let mut expected = kept.to_vec();
    expected.sort();
    assert_eq!(collect_keys(&tree), expected);
}

#[test]
fn test_btree_remove_everything() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for i in 0..100 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    for i in (0..100).rev() {
        assert!(tree.remove(&key(i)).unwrap());
    }

    assert!(tree.is_empty());
    assert!(engine.indexes().unwrap().is_empty());
    assert_eq!(
        engine.disk_manager().num_allocated_pages(),
        RESERVED_PAGE_COUNT
    );

    // The tree grows back from nothing
    assert!(tree.insert(&key(5), rid(5)).unwrap());
    assert_eq!(collect_keys(&tree), vec![5]);
}

#[test]
fn test_btree_iterator_from_key() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for i in (0..100).step_by(2) {
        tree.insert(&key(i), rid(i)).unwrap();
    }

    let from_exact: Vec<i32> = tree
        .begin_at(&key(40))
        .unwrap()
        .take(3)
        .map(|e| decode(&e.unwrap().0))
        .collect();
    assert_eq!(from_exact, vec![40, 42, 44]);

    let mut iter = tree.begin_at(&key(51)).unwrap();
    let (first, value) = iter.next().unwrap().unwrap();
    assert_eq!(decode(&first), 52);
    assert_eq!(value, rid(52));

    assert!(tree.begin_at(&key(99)).unwrap() == tree.end());
    assert!(tree.begin_at(&key(1000)).unwrap().is_end());
    assert_eq!(
        tree.begin_at(&key(-10)).unwrap().next().unwrap().unwrap().0,
        key(0).to_vec()
    );
}

#[test]
fn test_btree_iterator_reaches_end() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for i in 0..30 {
        tree.insert(&key(i), rid(i)).unwrap();
    }

    let mut iter = tree.begin().unwrap();
    assert!(iter != tree.end());
    for _ in 0..30 {
        assert!(iter.next().is_some());
    }
    assert!(iter == tree.end());
    assert!(iter.next().is_none());
    drop(iter);

    assert!(engine.buffer_pool().check_all_unpinned());
}

#[test]
fn test_btree_iterator_holds_pin() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());
    tree.insert(&key(1), rid(1)).unwrap();

    let iter = tree.begin().unwrap();
    let leaf = iter.page_id().unwrap();
    assert_eq!(engine.buffer_pool().pin_count(leaf), Some(1));
    drop(iter);
    assert_eq!(engine.buffer_pool().pin_count(leaf), Some(0));
}

#[test]
fn test_btree_range_scan() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for i in 0..100 {
        tree.insert(&key(i * 10), rid(i)).unwrap();
    }

    let results = tree.range_scan(&key(250), &key(500)).unwrap();
    let keys: Vec<i32> = results.iter().map(|(k, _)| decode(k)).collect();
    assert_eq!(keys, (25..=50).map(|i| i * 10).collect::<Vec<_>>());
    assert_eq!(results[0].1, rid(25));

    let between = tree.range_scan(&key(251), &key(259)).unwrap();
    assert!(between.is_empty());

    let reversed = tree.range_scan(&key(500), &key(250)).unwrap();
    assert!(reversed.is_empty());
}

#[test]
fn test_btree_negative_keys_order() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for k in [5, -3, 0, -100, 42, i32::MIN, i32::MAX] {
        tree.insert(&key(k), rid(0)).unwrap();
    }
    assert_eq!(
        collect_keys(&tree),
        vec![i32::MIN, -100, -3, 0, 5, 42, i32::MAX]
    );
}

#[test]
fn test_btree_bytewise_keys() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let config = BPlusTreeConfig::new(8)
        .with_leaf_max_size(3)
        .with_internal_max_size(3);
    let mut tree = engine
        .open_index(3, Arc::new(BytewiseComparator), config)
        .unwrap();

    let words: [&[u8; 8]; 6] = [
        b"banana__", b"apple___", b"cherry__", b"date____", b"apricot_", b"blueberr",
    ];
    for (i, word) in words.iter().enumerate() {
        tree.insert(&word[..], rid(i as i32)).unwrap();
    }
    tree.verify_integrity().unwrap();

    let ordered: Vec<Vec<u8>> = tree.begin().unwrap().map(|e| e.unwrap().0).collect();
    let mut expected: Vec<Vec<u8>> = words.iter().map(|w| w.to_vec()).collect();
    expected.sort();
    assert_eq!(ordered, expected);
    assert_eq!(tree.get_value(b"cherry__").unwrap(), Some(rid(2)));
}

#[test]
fn test_btree_persistence() {
    let temp = NamedTempFile::new().unwrap();

    let root = {
        let engine = open_engine(temp.path(), 16);
        let mut tree = open_tree(&engine, 1, small_tree_config());
        for i in 0..200 {
            tree.insert(&key(i), rid(i)).unwrap();
        }
        for i in (0..200).step_by(4) {
            tree.remove(&key(i)).unwrap();
        }
        tree.root_page_id()
    };

    let engine = open_engine(temp.path(), 16);
    let tree = open_tree(&engine, 1, small_tree_config());
    assert_eq!(tree.root_page_id(), root);
    tree.verify_integrity().unwrap();

    for i in 0..200 {
        let expected = (i % 4 != 0).then(|| rid(i));
        assert_eq!(tree.get_value(&key(i)).unwrap(), expected);
    }
}

#[test]
fn test_btree_reopen_with_other_key_size_fails() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    {
        let mut tree = open_tree(&engine, 1, small_tree_config());
        tree.insert(&key(1), rid(1)).unwrap();
    }

    assert!(matches!(
        engine.open_index(1, Arc::new(BytewiseComparator), BPlusTreeConfig::new(8)),
        Err(DbError::InvalidConfig(_))
    ));
}

#[test]
fn test_btree_multiple_indexes_share_pool() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut evens = open_tree(&engine, 1, small_tree_config());
    let mut odds = open_tree(&engine, 2, small_tree_config());

    for i in 0..100 {
        if i % 2 == 0 {
            evens.insert(&key(i), rid(i)).unwrap();
        } else {
            odds.insert(&key(i), rid(i)).unwrap();
        }
    }

    assert_ne!(evens.root_page_id(), odds.root_page_id());
    assert_eq!(evens.get_value(&key(3)).unwrap(), None);
    assert_eq!(odds.get_value(&key(3)).unwrap(), Some(rid(3)));
    evens.verify_integrity().unwrap();
    odds.verify_integrity().unwrap();

    let mut roots = engine.indexes().unwrap();
    roots.sort();
    assert_eq!(
        roots,
        vec![
            (1, evens.root_page_id().unwrap()),
            (2, odds.root_page_id().unwrap())
        ]
    );
}

#[test]
fn test_btree_destroy() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut keep = open_tree(&engine, 1, small_tree_config());
    keep.insert(&key(1), rid(1)).unwrap();
    let baseline = engine.disk_manager().num_allocated_pages();

    let mut tree = open_tree(&engine, 2, small_tree_config());
    for i in 0..200 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    assert!(engine.disk_manager().num_allocated_pages() > baseline);

    tree.destroy().unwrap();
    assert!(tree.is_empty());
    assert_eq!(engine.disk_manager().num_allocated_pages(), baseline);
    assert_eq!(
        engine.indexes().unwrap(),
        vec![(1, keep.root_page_id().unwrap())]
    );
    assert_eq!(keep.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_btree_leaf_split_out_of_pages_keeps_tree() {
    let temp = NamedTempFile::new().unwrap();
    // Room for the root leaf only; splitting it needs two more pages
    let engine = open_engine_with_ceiling(temp.path(), RESERVED_PAGE_COUNT + 2);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    for i in 1..=4 {
        assert!(tree.insert(&key(i), rid(i)).unwrap());
    }
    let allocated = engine.disk_manager().num_allocated_pages();

    assert!(matches!(
        tree.insert(&key(5), rid(5)),
        Err(DbError::OutOfMemory)
    ));

    assert_eq!(engine.disk_manager().num_allocated_pages(), allocated);
    for i in 1..=4 {
        assert_eq!(tree.get_value(&key(i)).unwrap(), Some(rid(i)));
    }
    assert_eq!(tree.get_value(&key(5)).unwrap(), None);
    assert!(!tree.insert(&key(4), rid(4)).unwrap());
    assert_eq!(collect_keys(&tree), vec![1, 2, 3, 4]);
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_root_split_out_of_pages_keeps_tree() {
    let temp = NamedTempFile::new().unwrap();
    // Four leaves under one root fit; the fifth leaf also needs an internal
    // sibling and a new root, one page more than the ceiling leaves
    let engine = open_engine_with_ceiling(temp.path(), RESERVED_PAGE_COUNT + 7);
    let mut tree = open_tree(&engine, 1, small_tree_config());

    let mut inserted = Vec::new();
    let mut next = 0;
    let allocated = loop {
        let allocated = engine.disk_manager().num_allocated_pages();
        match tree.insert(&key(next), rid(next)) {
            Ok(true) => inserted.push(next),
            Err(DbError::OutOfMemory) => break allocated,
            other => panic!("unexpected insert result {:?}", other),
        }
        next += 1;
    };

    assert_eq!(allocated, RESERVED_PAGE_COUNT + 5);
    assert_eq!(engine.disk_manager().num_allocated_pages(), allocated);
    assert_eq!(tree.get_value(&key(next)).unwrap(), None);
    for &i in &inserted {
        assert_eq!(tree.get_value(&key(i)).unwrap(), Some(rid(i)));
    }
    assert_eq!(collect_keys(&tree), inserted);
    tree.verify_integrity().unwrap();

    // A leaf with room still takes keys
    assert!(tree.insert(&key(-1), rid(1)).unwrap());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_full_roots_directory_frees_new_root() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);

    for index_id in 0..MAX_INDEX_ROOTS as u32 {
        let mut tree = open_tree(&engine, index_id, small_tree_config());
        assert!(tree.insert(&key(1), rid(1)).unwrap());
    }
    let allocated = engine.disk_manager().num_allocated_pages();

    let mut tree = open_tree(&engine, MAX_INDEX_ROOTS as u32, small_tree_config());
    assert!(matches!(
        tree.insert(&key(1), rid(1)),
        Err(DbError::DirectoryFull)
    ));
    assert!(tree.is_empty());
    assert_eq!(engine.disk_manager().num_allocated_pages(), allocated);
}

#[test]
fn test_btree_insert_beside_concurrent_flush() {
    let temp = NamedTempFile::new().unwrap();
    let engine = open_engine(temp.path(), 16);
    let mut tree = open_tree(&engine, 1, small_tree_config());
    let done = AtomicBool::new(false);

    let inserted = thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                engine.flush().unwrap();
            }
        });

        let inserted = (0..2000).try_for_each(|i| tree.insert(&key(i), rid(i)).map(|_| ()));
        done.store(true, Ordering::Release);
        inserted
    });
    inserted.unwrap();

    tree.verify_integrity().unwrap();
    assert_eq!(collect_keys(&tree), (0..2000).collect::<Vec<_>>());
    engine.flush().unwrap();
}
