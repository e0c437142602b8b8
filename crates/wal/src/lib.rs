//! # WAL - Segmented Write-Ahead Log
//!
//! Provides crash-safe durability for the StrataKV storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is encoded as a [`Record`] and appended
//! to the WAL **before** the corresponding in-memory update. On restart the
//! WAL is replayed to reconstruct the memtables, guaranteeing that no
//! acknowledged write is lost.
//!
//! The log is a directory of numbered segment files (`wal_0000000001.log`,
//! `wal_0000000002.log`, ...). Each segment has a byte budget; a frame that
//! does not fit is split, its prefix closing the current segment and its
//! remainder opening the next one. Replay therefore reads all segments as one
//! concatenated byte stream.
//!
//! ## Frame Format
//!
//! ```text
//! [frame_len: u32 BE][crc32: u32 BE][encoded record ...]
//! ```
//!
//! `frame_len` counts the encoded record only. The CRC covers the same bytes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use record::Record;
//! use wal::{Wal, WalOptions};
//!
//! let mut wal = Wal::open("wal", WalOptions::default()).unwrap();
//! wal.append(&Record::live("hello", b"world".to_vec(), 1)).unwrap();
//! drop(wal);
//!
//! let report = wal::replay("wal", |rec| println!("{:?}", rec)).unwrap();
//! assert!(!report.torn_tail);
//! ```

use byteorder::{BigEndian, ByteOrder};
use record::{codec, CodecError, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const FRAME_HEADER: usize = 8;
/// Frames larger than this are treated as corruption during replay.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".log";

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame passed its CRC but the record inside could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Tunables of the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalOptions {
    /// Byte budget of one segment file.
    pub segment_bytes: u64,
    /// If `true`, every append is followed by `fsync`.
    pub sync: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            segment_bytes: 1024 * 1024,
            sync: true,
        }
    }
}

/// Position of the first byte that could not be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub segment: u64,
    pub offset: u64,
}

/// Outcome of [`replay`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records handed to the callback.
    pub records: usize,
    /// Sequence numbers of the segments found, ascending.
    pub segments: Vec<u64>,
    /// `true` if replay stopped at a truncated or corrupt frame.
    pub torn_tail: bool,
    /// Where the torn frame starts. Set only when `torn_tail` is `true`.
    pub horizon: Option<Horizon>,
}

/// Append-only handle on the active segment of a WAL directory.
pub struct Wal {
    dir: PathBuf,
    options: WalOptions,
    active: u64,
    file: File,
    /// Bytes already in the active segment.
    written: u64,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl Wal {
    /// Opens the WAL in `dir`, creating the directory and a first segment if
    /// needed. Appends continue at the end of the highest-numbered segment.
    pub fn open<P: AsRef<Path>>(dir: P, options: WalOptions) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let active = list_segments(&dir)?
            .last()
            .map(|(seq, _)| *seq)
            .unwrap_or(1);
        let file = open_segment(&dir, active)?;
        let written = file.metadata()?.len();
        debug!(segment = active, bytes = written, "wal opened");

        Ok(Self {
            dir,
            options,
            active,
            file,
            written,
            buf: Vec::with_capacity(256),
        })
    }

    /// Frames `record` and appends it, rolling to new segments as the byte
    /// budget runs out.
    pub fn append(&mut self, record: &Record) -> Result<(), WalError> {
        // Reuse the internal buffer, keep the allocation
        let mut frame = std::mem::take(&mut self.buf);
        frame.clear();
        frame.extend_from_slice(&[0u8; FRAME_HEADER]);
        codec::encode_into(record, &mut frame);

        let body_len = frame.len() - FRAME_HEADER;
        if body_len > MAX_FRAME_BYTES {
            self.buf = frame;
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL frame too large",
            )));
        }
        let crc = crc32fast::hash(&frame[FRAME_HEADER..]);
        BigEndian::write_u32(&mut frame[0..4], body_len as u32);
        BigEndian::write_u32(&mut frame[4..8], crc);

        let result = self.write_frame(&frame);
        self.buf = frame;
        result
    }

    fn write_frame(&mut self, mut frame: &[u8]) -> Result<(), WalError> {
        while !frame.is_empty() {
            let room = self.options.segment_bytes.saturating_sub(self.written);
            if room == 0 {
                self.roll()?;
                continue;
            }
            let n = usize::try_from(room).unwrap_or(usize::MAX).min(frame.len());
            self.file.write_all(&frame[..n])?;
            self.written += n as u64;
            frame = &frame[n..];
        }

        self.file.flush()?;
        if self.options.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes the active segment and starts the next one.
    fn roll(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        if self.options.sync {
            self.file.sync_all()?;
        }
        let next = self.active + 1;
        self.file = open_segment(&self.dir, next)?;
        debug!(from = self.active, to = next, "wal segment rolled");
        self.active = next;
        self.written = 0;
        Ok(())
    }

    /// Starts a fresh segment unless the active one is still empty, and
    /// returns the active sequence number. Records appended after `seal`
    /// never share a segment with records appended before it.
    pub fn seal(&mut self) -> Result<u64, WalError> {
        if self.written > 0 {
            self.roll()?;
        }
        Ok(self.active)
    }

    /// Sequence number of the segment receiving appends.
    #[must_use]
    pub fn active_segment(&self) -> u64 {
        self.active
    }

    /// Sequence numbers of every segment on disk, ascending.
    pub fn segments(&self) -> Result<Vec<u64>, WalError> {
        Ok(list_segments(&self.dir)?
            .into_iter()
            .map(|(seq, _)| seq)
            .collect())
    }

    /// Deletes every segment numbered below `seq`. The active segment is never
    /// removed. Returns how many files were deleted.
    pub fn remove_segments_before(&mut self, seq: u64) -> Result<usize, WalError> {
        let limit = seq.min(self.active);
        let mut removed = 0;
        for (s, path) in list_segments(&self.dir)? {
            if s >= limit {
                break;
            }
            fs::remove_file(&path)?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, below = limit, "wal segments removed");
        }
        Ok(removed)
    }

    /// Forces all written data to disk via `sync_all()`.
    ///
    /// Useful when `sync` is `false` (batched mode) and the caller wants to
    /// ensure durability at a specific point.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// File name of segment `seq`.
#[must_use]
pub fn segment_file_name(seq: u64) -> String {
    format!("{}{:010}{}", SEGMENT_PREFIX, seq, SEGMENT_SUFFIX)
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

fn open_segment(dir: &Path, seq: u64) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(dir.join(segment_file_name(seq)))
}

/// Segments in `dir`, sorted by sequence number. A missing directory has none.
pub fn list_segments(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(seq) = name.to_str().and_then(parse_segment_name) {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Reads a list of segment files as one continuous stream and tracks the
/// position of the next unread byte.
struct SegmentChain {
    segments: Vec<(u64, PathBuf)>,
    current: usize,
    reader: Option<BufReader<File>>,
    opened: usize,
    offset: u64,
}

impl SegmentChain {
    fn new(segments: Vec<(u64, PathBuf)>) -> Self {
        Self {
            segments,
            current: 0,
            reader: None,
            opened: 0,
            offset: 0,
        }
    }

    fn position(&self) -> Option<Horizon> {
        self.segments.get(self.current).map(|(seq, _)| Horizon {
            segment: *seq,
            offset: self.offset,
        })
    }
}

impl Read for SegmentChain {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.reader.is_none() {
                if self.opened >= self.segments.len() {
                    return Ok(0);
                }
                let file = File::open(&self.segments[self.opened].1)?;
                self.reader = Some(BufReader::new(file));
                self.current = self.opened;
                self.opened += 1;
                self.offset = 0;
            }
            let n = match self.reader.as_mut() {
                Some(reader) => reader.read(buf)?,
                None => return Ok(0),
            };
            if n == 0 {
                self.reader = None;
                continue;
            }
            self.offset += n as u64;
            return Ok(n);
        }
    }
}

/// Reads until `buf` is full or the stream ends, returning the byte count.
fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Replays every valid record in the WAL directory, oldest first, calling
/// `apply` for each one.
///
/// # Termination
///
/// - **Clean EOF** at a frame boundary -> `Ok` with `torn_tail == false`.
/// - **Truncated frame**, **CRC mismatch** or **record checksum mismatch** ->
///   the replay horizon. Everything before it has been applied; the report
///   carries `torn_tail == true` and the horizon position.
/// - **I/O error** -> `Err(WalError::Io(...))`.
pub fn replay<P, F>(dir: P, mut apply: F) -> Result<ReplayReport, WalError>
where
    P: AsRef<Path>,
    F: FnMut(Record),
{
    let segments = list_segments(dir.as_ref())?;
    let mut report = ReplayReport {
        segments: segments.iter().map(|(seq, _)| *seq).collect(),
        ..Default::default()
    };
    let mut chain = SegmentChain::new(segments);
    // Reusable buffer to avoid allocation per frame
    let mut body = Vec::with_capacity(256);

    loop {
        let start = chain.position();
        let mut header = [0u8; FRAME_HEADER];
        let got = read_fully(&mut chain, &mut header)?;
        if got == 0 {
            break;
        }

        let torn = if got < FRAME_HEADER {
            Some("truncated frame header")
        } else {
            let frame_len = BigEndian::read_u32(&header[0..4]) as usize;
            let crc = BigEndian::read_u32(&header[4..8]);
            if frame_len == 0 || frame_len > MAX_FRAME_BYTES {
                Some("implausible frame length")
            } else {
                body.clear();
                body.resize(frame_len, 0);
                if read_fully(&mut chain, &mut body)? < frame_len {
                    Some("truncated frame body")
                } else if crc32fast::hash(&body) != crc {
                    Some("frame crc mismatch")
                } else {
                    match codec::decode(&body) {
                        Ok((rec, used)) if used == body.len() => {
                            apply(rec);
                            report.records += 1;
                            None
                        }
                        Ok(_) => Some("trailing bytes in frame"),
                        Err(e) if e.is_corruption() => Some("record checksum mismatch"),
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        };

        if let Some(reason) = torn {
            warn!(
                reason,
                segment = start.map(|h| h.segment),
                offset = start.map(|h| h.offset),
                replayed = report.records,
                "wal replay stopped at torn tail"
            );
            report.torn_tail = true;
            report.horizon = start;
            break;
        }
    }

    Ok(report)
}

/// Cuts the WAL at a replay horizon: truncates the horizon segment at the
/// horizon offset and deletes every later segment, so new appends follow the
/// last replayable frame directly.
pub fn truncate_at<P: AsRef<Path>>(dir: P, horizon: Horizon) -> Result<(), WalError> {
    for (seq, path) in list_segments(dir.as_ref())? {
        if seq == horizon.segment {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(horizon.offset)?;
            file.sync_all()?;
        } else if seq > horizon.segment {
            fs::remove_file(&path)?;
        }
    }
    info!(
        segment = horizon.segment,
        offset = horizon.offset,
        "wal truncated at replay horizon"
    );
    Ok(())
}

#[cfg(test)]
mod tests;
