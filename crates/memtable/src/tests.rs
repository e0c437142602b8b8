use super::*;

const KINDS: [MemtableKind; 3] = [MemtableKind::BTree, MemtableKind::SkipList, MemtableKind::HashMap];

fn small_params() -> MemtableParams {
    MemtableParams {
        btree_order: 3,
        skiplist_max_height: 4,
    }
}

fn put(m: &mut Memtable, key: &str, value: &[u8], ts: u64) {
    m.insert(Record::live(key, value.to_vec(), ts));
}

fn keys(m: &Memtable) -> Vec<String> {
    m.iter().map(|r| r.key.clone()).collect()
}

fn drain(mut it: impl RecordIterator) -> Vec<Record> {
    let mut out = Vec::new();
    while let Some(rec) = it.next_entry().unwrap() {
        out.push(rec);
    }
    out
}

// -------------------- Basic CRUD --------------------

#[test]
fn put_and_find_single_key() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "k1", b"v1", 1);
        assert_eq!(m.len(), 1, "{}", kind);
        let rec = m.find("k1").unwrap();
        assert_eq!(rec.timestamp, 1);
        assert_eq!(rec.value, b"v1");
        assert_eq!(m.kind(), kind);
    }
}

#[test]
fn last_write_wins() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "k", b"first", 1);
        put(&mut m, "k", b"second", 2);
        assert_eq!(m.get("k"), Some(b"second".as_slice()), "{}", kind);
        assert_eq!(m.len(), 1);
    }
}

#[test]
fn find_missing_key_returns_none() {
    for kind in KINDS {
        let m = Memtable::new(kind, small_params());
        assert!(m.find("nonexistent").is_none());
    }
}

#[test]
fn delete_overwrites_in_place() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "k1", b"v1", 1);
        m.delete("k1", 2);

        assert!(m.get("k1").is_none(), "{}", kind);
        let rec = m.find("k1").unwrap();
        assert!(rec.tombstone);
        assert_eq!(rec.timestamp, 2);
        assert_eq!(m.len(), 1); // tombstone still present
    }
}

#[test]
fn delete_absent_key_stores_tombstone() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        m.delete("ghost", 1);
        assert_eq!(m.len(), 1);
        assert!(m.find("ghost").unwrap().tombstone);
    }
}

#[test]
fn put_after_delete_resurrects_key() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "k", b"v1", 1);
        m.delete("k", 2);
        put(&mut m, "k", b"v2", 3);
        assert_eq!(m.get("k"), Some(b"v2".as_slice()));
    }
}

// -------------------- Capacity --------------------

#[test]
fn is_full_counts_records() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "a", b"1", 1);
        put(&mut m, "b", b"2", 2);
        assert!(!m.is_full(3));
        m.delete("c", 3);
        assert!(m.is_full(3));
        // Overwrites do not grow the table.
        put(&mut m, "a", b"x", 4);
        assert_eq!(m.len(), 3);
    }
}

// -------------------- Iterator ordering --------------------

#[test]
fn iter_yields_sorted_keys() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "c", b"3", 3);
        put(&mut m, "a", b"1", 1);
        put(&mut m, "b", b"2", 2);
        assert_eq!(keys(&m), vec!["a", "b", "c"], "{}", kind);
    }
}

#[test]
fn iter_includes_tombstones() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "a", b"1", 1);
        m.delete("b", 2);
        put(&mut m, "c", b"3", 3);

        let entries: Vec<&Record> = m.iter().collect();
        assert_eq!(entries.len(), 3);
        assert!(entries[1].tombstone); // "b" is tombstone
    }
}

#[test]
fn many_keys_in_random_order_stay_sorted() {
    // Deterministic shuffle: multiplication by a unit mod 1009.
    let order: Vec<u64> = (0..1009u64).map(|i| (i * 389) % 1009).collect();
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        for (ts, i) in order.iter().enumerate() {
            put(&mut m, &format!("key{:04}", i), b"v", ts as u64);
        }
        assert_eq!(m.len(), 1009);
        let got = keys(&m);
        let mut sorted = got.clone();
        sorted.sort();
        assert_eq!(got, sorted, "{}", kind);
        for i in 0..1009u64 {
            assert!(m.find(&format!("key{:04}", i)).is_some());
        }
    }
}

#[test]
fn iter_empty_memtable() {
    for kind in KINDS {
        let m = Memtable::new(kind, small_params());
        assert_eq!(m.iter().count(), 0);
        assert!(m.is_empty());
        assert_eq!(m.max_timestamp(), 0);
    }
}

// -------------------- approx_size tracking --------------------

#[test]
fn approx_size_includes_key_and_value() {
    let mut m = Memtable::default();
    assert_eq!(m.approx_size(), 0);
    // key="ab" (2) + value="ccc" (3) = 5
    put(&mut m, "ab", b"ccc", 1);
    assert_eq!(m.approx_size(), 5);
}

#[test]
fn approx_size_adjusts_on_overwrite_and_delete() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "a", b"aaa", 1); // 1+3
        assert_eq!(m.approx_size(), 4);
        put(&mut m, "a", b"bb", 2); // 1+2
        assert_eq!(m.approx_size(), 3);
        m.delete("a", 3); // key stays
        assert_eq!(m.approx_size(), 1);
    }
}

// -------------------- Edge cases --------------------

#[test]
fn empty_key_and_value() {
    for kind in KINDS {
        let mut m = Memtable::new(kind, small_params());
        put(&mut m, "", b"val", 1);
        put(&mut m, "k", b"", 2);
        assert_eq!(m.get(""), Some(b"val".as_slice()));
        assert_eq!(m.get("k"), Some(b"".as_slice()));
    }
}

#[test]
fn max_timestamp_tracks_newest() {
    let mut m = Memtable::default();
    put(&mut m, "a", b"1", 7);
    put(&mut m, "b", b"1", u64::MAX);
    put(&mut m, "c", b"1", 3);
    assert_eq!(m.max_timestamp(), u64::MAX);
}

// -------------------- Structure invariants --------------------

#[test]
fn btree_splits_keep_invariants() {
    let mut t = BTree::new(3);
    for i in 0..500u32 {
        let key = format!("{:05}", (i * 7919) % 500);
        t.insert(Record::live(key, vec![1], i as u64));
        t.check_invariants();
    }
    assert_eq!(t.len(), 500);
    assert!(t.height() > 3, "order-3 tree of 500 keys must be deep");
}

#[test]
fn btree_replace_returns_old_record() {
    let mut t = BTree::new(4);
    assert!(t.insert(Record::live("k", b"1".to_vec(), 1)).is_none());
    let old = t.insert(Record::live("k", b"2".to_vec(), 2)).unwrap();
    assert_eq!(old.value, b"1");
    assert_eq!(t.get("k").unwrap().value, b"2");
    assert_eq!(t.len(), 1);
}

#[test]
fn btree_low_order_is_clamped() {
    let mut t = BTree::new(1);
    for i in 0..20u64 {
        t.insert(Record::live(format!("k{:02}", i), vec![], i));
    }
    t.check_invariants();
}

#[test]
fn skiplist_levels_are_nested() {
    let mut s = SkipList::new(6);
    for i in 0..300u64 {
        s.insert(Record::live(format!("{:04}", (i * 131) % 300), vec![], i));
    }
    s.check_invariants();
    assert_eq!(s.len(), 300);
    assert!(s.height() <= 6);
}

#[test]
fn skiplist_height_one_is_a_linked_list() {
    let mut s = SkipList::new(1);
    for i in (0..50u64).rev() {
        s.insert(Record::live(format!("{:02}", i), vec![], i));
    }
    assert_eq!(s.height(), 1);
    s.check_invariants();
    assert_eq!(s.sorted().first().unwrap().key, "00");
}

// -------------------- MemtableIterator --------------------

#[test]
fn iterator_respects_lower_bound() {
    let mut m = Memtable::default();
    for k in ["apple", "banana", "cherry", "date"] {
        put(&mut m, k, b"v", 1);
    }
    let got: Vec<String> = drain(MemtableIterator::new(&m, Some("c")))
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(got, vec!["cherry", "date"]);
}

#[test]
fn iterator_is_a_snapshot() {
    let mut m = Memtable::default();
    put(&mut m, "a", b"1", 1);
    let mut it = MemtableIterator::new(&m, None);
    put(&mut m, "b", b"2", 2);

    assert_eq!(it.next_entry().unwrap().unwrap().key, "a");
    assert!(it.next_entry().unwrap().is_none());
}

#[test]
fn stopped_iterator_is_exhausted() {
    let mut m = Memtable::default();
    put(&mut m, "a", b"1", 1);
    put(&mut m, "b", b"2", 2);
    let mut it = MemtableIterator::new(&m, None);
    it.stop();
    assert!(it.next_entry().unwrap().is_none());
}

// -------------------- MemtablePool --------------------

fn pool(capacity: usize, instances: usize) -> MemtablePool {
    MemtablePool::new(MemtableKind::BTree, small_params(), capacity, instances, 1)
}

#[test]
fn pool_rotates_when_active_is_full() {
    let mut p = pool(2, 3);
    p.insert(Record::live("a", b"1".to_vec(), 1));
    assert!(!p.needs_rotation());
    p.insert(Record::live("b", b"2".to_vec(), 2));
    assert!(p.needs_rotation());

    p.rotate(2);
    assert!(!p.needs_rotation());
    assert_eq!(p.instances(), 2);
    assert!(!p.needs_flush());
    assert_eq!(p.oldest_wal_segment(), 1);
    assert_eq!(p.active().wal_segment, 2);
}

#[test]
fn pool_find_prefers_newest_memtable() {
    let mut p = pool(1, 4);
    p.insert(Record::live("k", b"old".to_vec(), 1));
    p.rotate(2);
    p.insert(Record::tombstone("k", 2));
    p.rotate(3);
    p.insert(Record::live("other", b"x".to_vec(), 3));

    assert!(p.find("k").unwrap().tombstone);
    assert_eq!(p.find("other").unwrap().value, b"x");
    assert!(p.find("missing").is_none());
}

#[test]
fn pool_flushes_oldest_first() {
    let mut p = pool(1, 2);
    p.insert(Record::live("a", b"1".to_vec(), 1));
    p.rotate(2);
    p.insert(Record::live("b", b"2".to_vec(), 2));
    p.rotate(3);
    assert!(p.needs_flush());

    assert_eq!(p.oldest_flushing().unwrap().wal_segment, 1);
    let oldest = p.pop_oldest_flushing().unwrap();
    assert_eq!(oldest.memtable.find("a").unwrap().value, b"1");
    assert!(!p.needs_flush());
    assert_eq!(p.oldest_wal_segment(), 2);
}

#[test]
fn pool_single_instance_flushes_on_every_rotation() {
    let mut p = pool(1, 1);
    p.insert(Record::live("a", b"1".to_vec(), 1));
    p.rotate(2);
    assert!(p.needs_flush());
}

#[test]
fn pool_rotating_empty_active_keeps_nothing() {
    let mut p = pool(1, 2);
    p.rotate(5);
    assert_eq!(p.instances(), 1);
    assert_eq!(p.oldest_wal_segment(), 5);
}

#[test]
fn pool_iterators_are_newest_first() {
    let mut p = pool(1, 4);
    p.insert(Record::live("k", b"1".to_vec(), 1));
    p.rotate(2);
    p.insert(Record::live("k", b"2".to_vec(), 2));

    let iters = p.iterators(None);
    assert_eq!(iters.len(), 2);
    let firsts: Vec<u64> = iters
        .into_iter()
        .map(|it| drain(it)[0].timestamp)
        .collect();
    assert_eq!(firsts, vec![2, 1]);
}
