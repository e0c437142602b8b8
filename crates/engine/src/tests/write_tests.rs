use super::{crash, key, put_numbered, small_config};
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn put_and_get() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    engine.put("name", b"alice")?;
    assert_eq!(engine.get("name")?, Some(b"alice".to_vec()));
    assert_eq!(engine.get("nope")?, None);
    Ok(())
}

#[test]
fn overwrite_keeps_latest_value() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    engine.put("k", b"v1")?;
    engine.put("k", b"v2")?;
    assert_eq!(engine.get("k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn delete_hides_key_and_put_resurrects_it() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    engine.put("k", b"v")?;
    engine.delete("k")?;
    assert_eq!(engine.get("k")?, None);

    engine.put("k", b"again")?;
    assert_eq!(engine.get("k")?, Some(b"again".to_vec()));
    Ok(())
}

#[test]
fn delete_of_missing_key_is_accepted() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    engine.delete("ghost")?;
    assert_eq!(engine.get("ghost")?, None);
    Ok(())
}

#[test]
fn empty_value_is_a_live_value() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    engine.put("k", b"")?;
    assert_eq!(engine.get("k")?, Some(Vec::new()));
    engine.flush()?;
    assert_eq!(engine.get("k")?, Some(Vec::new()));
    Ok(())
}

#[test]
fn invalid_keys_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    assert!(engine.put("", b"v").is_err());
    assert!(engine.delete("").is_err());
    let huge = "k".repeat(MAX_KEY_SIZE + 1);
    assert!(engine.put(&huge, b"v").is_err());
    assert_eq!(engine.stats()?.memtable_records, 0);
    Ok(())
}

#[test]
fn oversized_value_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    let huge = vec![0u8; MAX_VALUE_SIZE + 1];
    assert!(engine.put("k", &huge).is_err());
    assert_eq!(engine.get("k")?, None);
    Ok(())
}

#[test]
fn timestamps_strictly_increase() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    let mut last = engine.last_timestamp();
    for i in 0..20 {
        engine.put(&key(i % 3), b"v")?;
        assert!(engine.last_timestamp() > last);
        last = engine.last_timestamp();
    }
    Ok(())
}

#[test]
fn full_memtable_rotates_and_flushes_to_level_zero() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    put_numbered(&mut engine, 0..4)?;
    assert_eq!(engine.sstable_count(), 0, "a full memtable waits for the next write");

    engine.put(&key(4), b"v4")?;
    assert_eq!(engine.level_len(0), 1);
    assert_eq!(engine.stats()?.memtable_records, 1);
    for i in 0..5 {
        assert_eq!(engine.get(&key(i))?, Some(format!("v{}", i).into_bytes()));
    }
    Ok(())
}

#[test]
fn several_instances_buffer_before_flushing() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()).with_memtable_instances(3))?;

    put_numbered(&mut engine, 0..12)?;
    let stats = engine.stats()?;
    assert_eq!(stats.memtables, 3);
    assert_eq!(stats.memtable_records, 12);
    assert_eq!(engine.sstable_count(), 0);

    engine.put(&key(12), b"v12")?;
    assert_eq!(engine.level_len(0), 1);
    assert_eq!(engine.stats()?.memtables, 3);
    Ok(())
}

#[test]
fn flush_writes_every_memtable() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()).with_memtable_instances(3))?;

    put_numbered(&mut engine, 0..10)?;
    engine.flush()?;
    assert_eq!(engine.level_len(0), 3);
    assert_eq!(engine.stats()?.memtable_records, 0);

    // Nothing left to flush
    engine.flush()?;
    assert_eq!(engine.level_len(0), 3);
    for i in 0..10 {
        assert_eq!(engine.get(&key(i))?, Some(format!("v{}", i).into_bytes()));
    }
    Ok(())
}

#[test]
fn flushed_wal_segments_are_removed() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;

    put_numbered(&mut engine, 0..9)?;
    assert_eq!(engine.level_len(0), 2);
    assert_eq!(engine.stats()?.wal_segments, 1, "only the active segment remains");
    Ok(())
}

#[test]
fn wal_rolls_segments_by_byte_budget() -> Result<()> {
    let dir = tempdir()?;
    let config = small_config(dir.path())
        .with_memtable_capacity(100)
        .with_wal_segment_bytes(64);
    let mut engine = Engine::open(config)?;

    put_numbered(&mut engine, 0..10)?;
    assert!(engine.stats()?.wal_segments > 1);
    crash(engine);

    let engine = Engine::open(small_config(dir.path()).with_memtable_capacity(100))?;
    for i in 0..10 {
        assert_eq!(engine.get(&key(i))?, Some(format!("v{}", i).into_bytes()));
    }
    Ok(())
}

#[test]
fn close_flushes_and_leaves_nothing_to_replay() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;
    put_numbered(&mut engine, 0..3)?;
    engine.close()?;

    let engine = Engine::open(small_config(dir.path()))?;
    assert_eq!(engine.stats()?.memtable_records, 0);
    assert_eq!(engine.level_len(0), 1);
    assert_eq!(engine.get(&key(2))?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn every_memtable_kind_behaves_the_same() -> Result<()> {
    for kind in [MemtableKind::BTree, MemtableKind::SkipList, MemtableKind::HashMap] {
        let dir = tempdir()?;
        let mut engine = Engine::open(small_config(dir.path()).with_memtable_kind(kind))?;

        put_numbered(&mut engine, 0..10)?;
        engine.delete(&key(3))?;
        engine.put(&key(5), b"new")?;

        assert_eq!(engine.get(&key(3))?, None, "{:?}", kind);
        assert_eq!(engine.get(&key(5))?, Some(b"new".to_vec()), "{:?}", kind);
        assert_eq!(engine.get(&key(9))?, Some(b"v9".to_vec()), "{:?}", kind);
    }
    Ok(())
}

#[test]
fn debug_output_names_the_engine() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(small_config(dir.path()))?;
    let out = format!("{:?}", engine);
    assert!(out.starts_with("Engine"));
    assert!(out.contains("tables_per_level"));
    Ok(())
}

#[test]
fn engine_can_be_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Engine>();
}
