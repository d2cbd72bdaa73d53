// src/cache/strings.rs

//! Deduplicated string storage
//!
//! Every name, version and section string in the cache lives here exactly
//! once. Records refer to strings by byte offset into the pool. Each entry is
//! a little-endian `u32` length followed by the UTF-8 bytes; offset 0 is a
//! reserved empty slot so a zero [`StrRef`] means "no string".

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Offset of a string inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StrRef(pub(crate) u32);

impl StrRef {
    pub const NONE: StrRef = StrRef(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self) -> u32 {
        self.0
    }
}

/// Append-only, deduplicating string pool
#[derive(Debug, Clone)]
pub struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, StrRef>,
}

const LEN_PREFIX: usize = 4;

impl StringPool {
    pub fn new() -> Self {
        Self {
            // Reserved slot: a zero-length entry at offset 0
            data: vec![0; LEN_PREFIX],
            index: HashMap::new(),
        }
    }

    /// Store `s` (once) and return its offset
    ///
    /// The empty string always maps to [`StrRef::NONE`].
    pub fn intern(&mut self, s: &str) -> Result<StrRef> {
        if s.is_empty() {
            return Ok(StrRef::NONE);
        }
        if let Some(&existing) = self.index.get(s) {
            return Ok(existing);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| Error::BuildError("string pool exhausted".to_string()))?;
        let len = u32::try_from(s.len())
            .map_err(|_| Error::BuildError(format!("string of {} bytes is too long", s.len())))?;
        if (self.data.len() + LEN_PREFIX + s.len()) > u32::MAX as usize {
            return Err(Error::BuildError("string pool exhausted".to_string()));
        }

        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(s.as_bytes());

        let r = StrRef(offset);
        self.index.insert(s.to_string(), r);
        Ok(r)
    }

    /// Look up an already interned string without inserting
    pub fn lookup(&self, s: &str) -> Option<StrRef> {
        if s.is_empty() {
            return Some(StrRef::NONE);
        }
        self.index.get(s).copied()
    }

    /// Resolve an offset; invalid offsets read as the empty string
    pub fn get(&self, r: StrRef) -> &str {
        let start = r.0 as usize;
        let Some(prefix) = self.data.get(start..start + LEN_PREFIX) else {
            return "";
        };
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        self.data
            .get(start + LEN_PREFIX..start + LEN_PREFIX + len)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .unwrap_or("")
    }

    /// Number of distinct non-empty strings
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Raw pool bytes, as stored in a cache image
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Rebuild a pool from image bytes, validating every entry
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LEN_PREFIX || bytes[..LEN_PREFIX] != [0; LEN_PREFIX] {
            return Err(Error::ImageError("string pool is missing its reserved slot".to_string()));
        }

        let mut index = HashMap::new();
        let mut pos = LEN_PREFIX;
        while pos < bytes.len() {
            let prefix = bytes
                .get(pos..pos + LEN_PREFIX)
                .ok_or_else(|| Error::ImageError(format!("truncated string at offset {}", pos)))?;
            let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            let body = bytes
                .get(pos + LEN_PREFIX..pos + LEN_PREFIX + len)
                .ok_or_else(|| Error::ImageError(format!("truncated string at offset {}", pos)))?;
            let text = std::str::from_utf8(body).map_err(|e| {
                Error::ImageError(format!("string at offset {} is not UTF-8: {}", pos, e))
            })?;
            index.insert(text.to_string(), StrRef(pos as u32));
            pos += LEN_PREFIX + len;
        }

        Ok(Self {
            data: bytes.to_vec(),
            index,
        })
    }

    /// Check that `r` points at the start of an entry
    pub(crate) fn contains(&self, r: StrRef) -> bool {
        r.is_none() || self.index.get(self.get(r)) == Some(&r)
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}
