use super::small_config;
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn cache_stays_within_capacity() {
    let cache = ReadCache::new(2);
    for i in 0..50 {
        cache.add(&format!("k{}", i), vec![i as u8]);
    }
    assert!(cache.len() <= 2);
}

#[test]
fn cache_replaces_existing_values() {
    let cache = ReadCache::new(2);
    cache.add("a", b"1".to_vec());
    cache.add("a", b"2".to_vec());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("a"), Some(b"2".to_vec()));
}

#[test]
fn removed_keys_miss() {
    let cache = ReadCache::new(4);
    cache.add("a", b"1".to_vec());
    cache.add("b", b"2".to_vec());
    cache.remove("a");
    cache.remove("missing");
    assert_eq!(cache.get("a"), None);
    assert_eq!(cache.get("b"), Some(b"2".to_vec()));
    assert_eq!(cache.len(), 1);
}

#[test]
fn zero_capacity_disables_caching() {
    let cache = ReadCache::new(0);
    cache.add("a", b"1".to_vec());
    assert!(cache.is_empty());
    assert_eq!(cache.get("a"), None);
}

#[test]
fn sstable_hits_are_cached() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;
    engine.put("k", b"v")?;
    engine.flush()?;

    assert_eq!(engine.stats()?.cache_entries, 0);
    assert_eq!(engine.get("k")?, Some(b"v".to_vec()));
    assert_eq!(engine.stats()?.cache_entries, 1);
    assert_eq!(engine.get("k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn memtable_hits_and_deleted_keys_are_not_cached() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;
    engine.put("gone", b"v")?;
    engine.delete("gone")?;
    engine.flush()?;
    engine.put("fresh", b"v")?;

    assert_eq!(engine.get("fresh")?, Some(b"v".to_vec()));
    assert_eq!(engine.get("gone")?, None);
    assert_eq!(engine.stats()?.cache_entries, 0);
    Ok(())
}

#[test]
fn writes_invalidate_cached_values() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()))?;
    engine.put("k", b"old")?;
    engine.put("j", b"old")?;
    engine.flush()?;
    assert_eq!(engine.get("k")?, Some(b"old".to_vec()));
    assert_eq!(engine.get("j")?, Some(b"old".to_vec()));

    engine.put("k", b"new")?;
    engine.delete("j")?;
    engine.flush()?;
    assert_eq!(engine.stats()?.cache_entries, 0);
    assert_eq!(engine.get("k")?, Some(b"new".to_vec()));
    assert_eq!(engine.get("j")?, None);
    Ok(())
}

#[test]
fn disabled_cache_still_serves_reads() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(small_config(dir.path()).with_cache_capacity(0))?;
    engine.put("k", b"v")?;
    engine.flush()?;
    assert_eq!(engine.get("k")?, Some(b"v".to_vec()));
    assert_eq!(engine.stats()?.cache_entries, 0);
    Ok(())
}
