//! Per-table key dictionary used by compressed tables.
//!
//! Keys are replaced by decimal codes assigned in key order: the i-th record
//! of the table is stored under the key `i.to_string()`. `dictionary.db`
//! persists the original keys in code order:
//!
//! ```text
//! [count: u64 BE] then per code: [key_len: u64 BE][key]
//! ```

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::format::{read_key, write_key};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    keys: Vec<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the next key and returns its code.
    pub fn push(&mut self, key: &str) -> String {
        let code = self.keys.len().to_string();
        self.keys.push(key.to_string());
        code
    }

    /// Original key for a stored code.
    pub fn decode<'a>(&'a self, code: &str) -> Result<&'a str> {
        let idx: usize = code
            .parse()
            .map_err(|_| anyhow!("corrupt table: {:?} is not a dictionary code", code))?;
        self.keys
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("corrupt table: dictionary code {} out of range", idx))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u64::<BigEndian>(self.keys.len() as u64)?;
        for key in &self.keys {
            write_key(w, key)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let count = r.read_u64::<BigEndian>()?;
        if count > u32::MAX as u64 {
            bail!("corrupt dictionary: {} entries", count);
        }
        let mut keys = Vec::new();
        for _ in 0..count {
            keys.push(read_key(r)?);
        }
        Ok(Self { keys })
    }
}
