//! Binary encoding of a single [`Record`].
//!
//! ```text
//! [key_len: u64 BE][key][checksum: u32 BE][timestamp: u64 BE][tombstone: u8]
//! [value_len: u64 BE][value]   (live records only)
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read};
use thiserror::Error;

use crate::{checksum, Record};

/// Maximum key size accepted while decoding (64 KiB). Guards allocations
/// against corrupt length prefixes.
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size accepted while decoding (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Errors produced while decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The recomputed checksum over `key ++ value` disagrees with the stored one.
    #[error("corrupt record: checksum expected {expected:#010x}, got {actual:#010x}")]
    CorruptRecord { expected: u32, actual: u32 },

    /// The buffer ended in the middle of a record.
    #[error("truncated record")]
    Truncated,

    #[error("invalid tombstone flag {0}")]
    InvalidTombstoneFlag(u8),

    #[error("record key is not valid utf-8")]
    InvalidKey,

    #[error("{field} length {len} exceeds maximum {max}")]
    LengthTooLarge {
        field: &'static str,
        len: u64,
        max: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Returns `true` for errors that mean the bytes were damaged or cut short,
    /// as opposed to an I/O failure of the medium.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}

fn eof_as_truncated(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Truncated
    } else {
        CodecError::Io(e)
    }
}

/// Encodes `record` into a fresh buffer.
#[must_use]
pub fn encode(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record.encoded_len());
    encode_into(record, &mut buf);
    buf
}

/// Appends the encoding of `record` to `buf`.
pub fn encode_into(record: &Record, buf: &mut Vec<u8>) {
    buf.reserve(record.encoded_len());
    // Writes into a Vec cannot fail.
    let _ = buf.write_u64::<BigEndian>(record.key.len() as u64);
    buf.extend_from_slice(record.key.as_bytes());
    let _ = buf.write_u32::<BigEndian>(record.checksum);
    let _ = buf.write_u64::<BigEndian>(record.timestamp);
    if record.tombstone {
        buf.push(1);
    } else {
        buf.push(0);
        let _ = buf.write_u64::<BigEndian>(record.value.len() as u64);
        buf.extend_from_slice(&record.value);
    }
}

/// Decodes one record from the front of `buf`, returning it together with
/// the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(Record, usize), CodecError> {
    let mut cursor = buf;
    match read_from(&mut cursor)? {
        Some(record) => Ok((record, buf.len() - cursor.len())),
        None => Err(CodecError::Truncated),
    }
}

/// Length of the encoded record at the front of `buf`, taken from its length
/// prefixes alone. The checksum is not verified, so this still finds record
/// boundaries when a key or value byte is damaged.
pub fn peek_len(buf: &[u8]) -> Result<usize, CodecError> {
    let fixed = |at: usize| -> Result<u64, CodecError> {
        buf.get(at..at + 8)
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                u64::from_be_bytes(raw)
            })
            .ok_or(CodecError::Truncated)
    };

    let key_len = fixed(0)?;
    if key_len > MAX_KEY_BYTES as u64 {
        return Err(CodecError::LengthTooLarge {
            field: "key",
            len: key_len,
            max: MAX_KEY_BYTES,
        });
    }
    // key_len, key, checksum, timestamp, tombstone
    let mut len = 8 + key_len as usize + 4 + 8 + 1;
    match buf.get(len - 1) {
        None => return Err(CodecError::Truncated),
        Some(1) => {}
        Some(0) => {
            let value_len = fixed(len)?;
            if value_len > MAX_VALUE_BYTES as u64 {
                return Err(CodecError::LengthTooLarge {
                    field: "value",
                    len: value_len,
                    max: MAX_VALUE_BYTES,
                });
            }
            len += 8 + value_len as usize;
        }
        Some(&other) => return Err(CodecError::InvalidTombstoneFlag(other)),
    }
    if buf.len() < len {
        return Err(CodecError::Truncated);
    }
    Ok(len)
}

/// Reads one record from a stream.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes left at a record
/// boundary) and [`CodecError::Truncated`] if the stream ends mid-record.
pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Record>, CodecError> {
    let mut len_buf = [0u8; 8];
    let got = read_fully(r, &mut len_buf)?;
    if got == 0 {
        return Ok(None);
    }
    if got < len_buf.len() {
        return Err(CodecError::Truncated);
    }

    let key_len = u64::from_be_bytes(len_buf);
    if key_len > MAX_KEY_BYTES as u64 {
        return Err(CodecError::LengthTooLarge {
            field: "key",
            len: key_len,
            max: MAX_KEY_BYTES,
        });
    }
    let mut key = vec![0u8; key_len as usize];
    r.read_exact(&mut key).map_err(eof_as_truncated)?;

    let stored = r.read_u32::<BigEndian>().map_err(eof_as_truncated)?;
    let timestamp = r.read_u64::<BigEndian>().map_err(eof_as_truncated)?;
    let tombstone = match r.read_u8().map_err(eof_as_truncated)? {
        0 => false,
        1 => true,
        other => return Err(CodecError::InvalidTombstoneFlag(other)),
    };

    let value = if tombstone {
        Vec::new()
    } else {
        let value_len = r.read_u64::<BigEndian>().map_err(eof_as_truncated)?;
        if value_len > MAX_VALUE_BYTES as u64 {
            return Err(CodecError::LengthTooLarge {
                field: "value",
                len: value_len,
                max: MAX_VALUE_BYTES,
            });
        }
        let mut value = vec![0u8; value_len as usize];
        r.read_exact(&mut value).map_err(eof_as_truncated)?;
        value
    };

    // Verify before the utf-8 check so any damaged key byte reports as corruption.
    let actual = checksum(&key, &value);
    if actual != stored {
        return Err(CodecError::CorruptRecord {
            expected: stored,
            actual,
        });
    }

    let key = String::from_utf8(key).map_err(|_| CodecError::InvalidKey)?;
    Ok(Some(Record {
        key,
        value,
        timestamp,
        tombstone,
        checksum: stored,
    }))
}

/// Reads until `buf` is full or the stream ends, returning the byte count.
fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(filled)
}
