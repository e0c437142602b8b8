use super::*;
use std::fs;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn make_put(ts: u64, key: &str, value: &[u8]) -> Record {
    Record::live(key, value.to_vec(), ts)
}

fn make_del(ts: u64, key: &str) -> Record {
    Record::tombstone(key, ts)
}

fn opts(segment_bytes: u64) -> WalOptions {
    WalOptions {
        segment_bytes,
        sync: false,
    }
}

fn replay_all(dir: &Path) -> (Vec<Record>, ReplayReport) {
    let mut recs = Vec::new();
    let report = replay(dir, |r| recs.push(r)).unwrap();
    (recs, report)
}

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(segment_file_name(seq))
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay_put_and_del() {
    let dir = tempdir().unwrap();

    {
        let mut w = Wal::open(dir.path(), WalOptions::default()).unwrap();
        w.append(&make_put(1, "k", b"v1")).unwrap();
        w.append(&make_put(2, "k2", b"v2")).unwrap();
        w.append(&make_del(3, "k")).unwrap();
    }

    let (recs, report) = replay_all(dir.path());
    assert_eq!(
        recs,
        vec![make_put(1, "k", b"v1"), make_put(2, "k2", b"v2"), make_del(3, "k")]
    );
    assert_eq!(report.records, 3);
    assert!(!report.torn_tail);
    assert_eq!(report.horizon, None);
}

#[test]
fn open_creates_first_segment() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("nested/wal"), opts(1024)).unwrap();
    assert_eq!(wal.active_segment(), 1);
    assert_eq!(wal.segments().unwrap(), vec![1]);
    assert!(wal.dir().join("wal_0000000001.log").exists());
}

#[test]
fn replay_missing_directory_is_empty() {
    let dir = tempdir().unwrap();
    let (recs, report) = replay_all(&dir.path().join("absent"));
    assert!(recs.is_empty());
    assert!(report.segments.is_empty());
    assert!(!report.torn_tail);
}

#[test]
fn replay_empty_segment() {
    let dir = tempdir().unwrap();
    fs::write(segment_path(dir.path(), 1), b"").unwrap();

    let (recs, report) = replay_all(dir.path());
    assert!(recs.is_empty());
    assert_eq!(report.segments, vec![1]);
    assert!(!report.torn_tail);
}

#[test]
fn frame_header_is_big_endian() {
    let dir = tempdir().unwrap();
    let rec = make_put(9, "key", b"value");
    {
        let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
        w.append(&rec).unwrap();
    }

    let data = fs::read(segment_path(dir.path(), 1)).unwrap();
    let body = codec::encode(&rec);
    assert_eq!(&data[0..4], &(body.len() as u32).to_be_bytes());
    assert_eq!(&data[4..8], &crc32fast::hash(&body).to_be_bytes());
    assert_eq!(&data[8..], &body[..]);
}

// -------------------- Segment rollover --------------------

#[test]
fn frame_straddles_segments_and_replays_intact() {
    let dir = tempdir().unwrap();
    let big = vec![0xABu8; 100];
    {
        // Each frame is well over 40 bytes, so every append crosses a boundary.
        let mut w = Wal::open(dir.path(), opts(40)).unwrap();
        for i in 0..5u64 {
            w.append(&make_put(i + 1, &format!("key{}", i), &big)).unwrap();
        }
        assert!(w.active_segment() > 5);
    }

    let segs = fs::read_dir(dir.path()).unwrap().count();
    assert!(segs > 5, "expected many segments, found {}", segs);
    for entry in fs::read_dir(dir.path()).unwrap() {
        assert!(entry.unwrap().metadata().unwrap().len() <= 40);
    }

    let (recs, report) = replay_all(dir.path());
    assert!(!report.torn_tail);
    assert_eq!(recs.len(), 5);
    for (i, rec) in recs.iter().enumerate() {
        assert_eq!(rec.key, format!("key{}", i));
        assert_eq!(rec.value, big);
    }
}

#[test]
fn reopen_resumes_latest_segment() {
    let dir = tempdir().unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(64)).unwrap();
        for i in 0..6u64 {
            w.append(&make_put(i, &format!("k{}", i), b"v")).unwrap();
        }
    }

    let latest = {
        let w = Wal::open(dir.path(), opts(64)).unwrap();
        let segs = w.segments().unwrap();
        assert_eq!(w.active_segment(), *segs.last().unwrap());
        w.active_segment()
    };

    {
        let mut w = Wal::open(dir.path(), opts(64)).unwrap();
        w.append(&make_put(100, "after", b"reopen")).unwrap();
        assert!(w.active_segment() >= latest);
    }

    let (recs, report) = replay_all(dir.path());
    assert!(!report.torn_tail);
    assert_eq!(recs.len(), 7);
    assert_eq!(recs.last().unwrap().key, "after");
}

#[test]
fn seal_starts_fresh_segment_only_when_dirty() {
    let dir = tempdir().unwrap();
    let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();

    assert_eq!(w.seal().unwrap(), 1, "empty segment is reused");
    w.append(&make_put(1, "a", b"1")).unwrap();
    assert_eq!(w.seal().unwrap(), 2);
    assert_eq!(w.seal().unwrap(), 2);
    w.append(&make_put(2, "b", b"2")).unwrap();

    assert_eq!(w.segments().unwrap(), vec![1, 2]);
    let (recs, _) = replay_all(dir.path());
    assert_eq!(recs.len(), 2);
}

#[test]
fn remove_segments_before_keeps_newer_and_active() {
    let dir = tempdir().unwrap();
    let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
    w.append(&make_put(1, "old", b"1")).unwrap();
    w.seal().unwrap();
    w.append(&make_put(2, "mid", b"2")).unwrap();
    let third = w.seal().unwrap();
    w.append(&make_put(3, "new", b"3")).unwrap();

    assert_eq!(w.remove_segments_before(third).unwrap(), 2);
    assert_eq!(w.segments().unwrap(), vec![third]);

    // Never removes the active segment even when asked to go further.
    assert_eq!(w.remove_segments_before(u64::MAX).unwrap(), 0);

    let (recs, _) = replay_all(dir.path());
    assert_eq!(recs, vec![make_put(3, "new", b"3")]);
}

#[test]
fn replay_is_deterministic() {
    let dir = tempdir().unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(50)).unwrap();
        for i in 0..20u64 {
            if i % 3 == 0 {
                w.append(&make_del(i, &format!("k{}", i % 7))).unwrap();
            } else {
                w.append(&make_put(i, &format!("k{}", i % 7), &[i as u8; 13])).unwrap();
            }
        }
    }

    let (first, _) = replay_all(dir.path());
    let (second, _) = replay_all(dir.path());
    assert_eq!(first, second);
    assert_eq!(first.len(), 20);
}

// -------------------- Torn tail --------------------

#[test]
fn truncated_tail_after_valid_records() {
    let dir = tempdir().unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
        w.append(&make_put(1, "k1", b"v1")).unwrap();
        w.append(&make_put(2, "k2", b"v2")).unwrap();
    }

    // Append a partial frame (just the length header, no body)
    let path = segment_path(dir.path(), 1);
    let mut data = fs::read(&path).unwrap();
    let valid_len = data.len() as u64;
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x20]);
    fs::write(&path, &data).unwrap();

    let (recs, report) = replay_all(dir.path());
    assert_eq!(recs, vec![make_put(1, "k1", b"v1"), make_put(2, "k2", b"v2")]);
    assert!(report.torn_tail);
    assert_eq!(
        report.horizon,
        Some(Horizon {
            segment: 1,
            offset: valid_len
        })
    );
}

#[test]
fn crc_mismatch_is_the_horizon() {
    let dir = tempdir().unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
        w.append(&make_put(1, "k1", b"v1")).unwrap();
        w.append(&make_put(2, "k2", b"v2")).unwrap();
        w.append(&make_put(3, "k3", b"v3")).unwrap();
    }

    // Flip the last byte of the second frame's body.
    let path = segment_path(dir.path(), 1);
    let mut data = fs::read(&path).unwrap();
    let frame = FRAME_HEADER + codec::encode(&make_put(1, "k1", b"v1")).len();
    data[2 * frame - 1] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let (recs, report) = replay_all(dir.path());
    assert_eq!(recs, vec![make_put(1, "k1", b"v1")]);
    assert!(report.torn_tail);
    assert_eq!(report.horizon.unwrap().offset, frame as u64);
}

#[test]
fn torn_frame_spanning_segments() {
    let dir = tempdir().unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(32)).unwrap();
        w.append(&make_put(1, "a", &[1u8; 10])).unwrap();
        w.append(&make_put(2, "b", &[2u8; 40])).unwrap();
    }

    // Drop the last segment: the second frame loses its tail.
    let w = Wal::open(dir.path(), opts(32)).unwrap();
    let last = *w.segments().unwrap().last().unwrap();
    drop(w);
    fs::remove_file(segment_path(dir.path(), last)).unwrap();

    let (recs, report) = replay_all(dir.path());
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].key, "a");
    assert!(report.torn_tail);
}

#[test]
fn truncate_at_horizon_lets_new_appends_replay() {
    let dir = tempdir().unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
        w.append(&make_put(1, "k1", b"v1")).unwrap();
    }
    let path = segment_path(dir.path(), 1);
    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&[0xDE, 0xAD, 0xBE]);
    fs::write(&path, &data).unwrap();

    let (_, report) = replay_all(dir.path());
    assert!(report.torn_tail);
    truncate_at(dir.path(), report.horizon.unwrap()).unwrap();

    {
        let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
        w.append(&make_put(2, "k2", b"v2")).unwrap();
    }

    let (recs, report) = replay_all(dir.path());
    assert!(!report.torn_tail);
    assert_eq!(recs, vec![make_put(1, "k1", b"v1"), make_put(2, "k2", b"v2")]);
}

#[test]
fn ignores_foreign_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    fs::write(dir.path().join("wal_abc.log"), b"junk").unwrap();
    {
        let mut w = Wal::open(dir.path(), opts(1 << 20)).unwrap();
        w.append(&make_put(1, "k", b"v")).unwrap();
        assert_eq!(w.segments().unwrap(), vec![1]);
    }
    let (recs, report) = replay_all(dir.path());
    assert_eq!(recs.len(), 1);
    assert!(!report.torn_tail);
}

#[test]
fn segment_names_sort_numerically() {
    assert_eq!(segment_file_name(7), "wal_0000000007.log");
    assert_eq!(parse_segment_name("wal_0000000012.log"), Some(12));
    assert_eq!(parse_segment_name("wal_12.tmp"), None);
}
