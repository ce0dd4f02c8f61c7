// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persisted daemon state consumed by the core.
//!
//! The actual store lives outside this crate (the daemon wires one in);
//! the core consumes the [`CacheFile`] trait for selector persistence and
//! the [`SavedBinary`] envelope for small cached blobs such as rule sets.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Binary cache envelope: version byte `0x01`, uvarint-length content,
/// big-endian i64 unix seconds, uvarint-length UTF-8 etag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBinary {
    pub content: Vec<u8>,
    pub last_updated: SystemTime,
    pub last_etag: String,
}

const ENVELOPE_VERSION: u8 = 1;

impl SavedBinary {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.content.len() + self.last_etag.len() + 20);
        buf.push(ENVELOPE_VERSION);
        write_uvarint(&mut buf, self.content.len() as u64);
        buf.extend_from_slice(&self.content);
        let unix = match self.last_updated.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(err) => -(err.duration().as_secs() as i64),
        };
        buf.extend_from_slice(&unix.to_be_bytes());
        write_uvarint(&mut buf, self.last_etag.len() as u64);
        buf.extend_from_slice(self.last_etag.as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };
        let version = cursor.read_byte()?;
        if version != ENVELOPE_VERSION {
            return Err(Error::Decode(format!("unknown envelope version {}", version)));
        }
        let content_len = cursor.read_uvarint()?;
        let content = cursor.read_bytes(content_len as usize)?.to_vec();
        let unix = i64::from_be_bytes(
            cursor
                .read_bytes(8)?
                .try_into()
                .map_err(|_| Error::Decode("short timestamp".to_string()))?,
        );
        let last_updated = if unix >= 0 {
            UNIX_EPOCH + Duration::from_secs(unix as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(unix.unsigned_abs())
        };
        let etag_len = cursor.read_uvarint()?;
        let etag = cursor.read_bytes(etag_len as usize)?;
        let last_etag = String::from_utf8(etag.to_vec())
            .map_err(|_| Error::Decode("etag is not utf-8".to_string()))?;
        Ok(SavedBinary {
            content,
            last_updated,
            last_etag,
        })
    }
}

fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Decode("unexpected end of envelope".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::Decode("unexpected end of envelope".to_string()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_uvarint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 {
                return Err(Error::Decode("uvarint overflow".to_string()));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

/// External KV interface persisting daemon state across restarts.
pub trait CacheFile: Send + Sync {
    /// The persisted selection of a selector group, if any.
    fn load_selected(&self, group: &str) -> Option<String>;
    fn store_selected(&self, group: &str, selected: &str) -> Result<()>;
    fn load_rule_set(&self, tag: &str) -> Option<SavedBinary>;
    fn save_rule_set(&self, tag: &str, set: &SavedBinary) -> Result<()>;
}

/// In-memory store, for tests and single-run deployments.
#[derive(Default)]
pub struct MemoryCacheFile {
    selected: Mutex<HashMap<String, String>>,
    rule_sets: Mutex<HashMap<String, SavedBinary>>,
}

impl MemoryCacheFile {
    pub fn new() -> Self {
        MemoryCacheFile::default()
    }
}

impl CacheFile for MemoryCacheFile {
    fn load_selected(&self, group: &str) -> Option<String> {
        self.selected.lock().get(group).cloned()
    }

    fn store_selected(&self, group: &str, selected: &str) -> Result<()> {
        self.selected
            .lock()
            .insert(group.to_string(), selected.to_string());
        Ok(())
    }

    fn load_rule_set(&self, tag: &str) -> Option<SavedBinary> {
        self.rule_sets.lock().get(tag).cloned()
    }

    fn save_rule_set(&self, tag: &str, set: &SavedBinary) -> Result<()> {
        self.rule_sets.lock().insert(tag.to_string(), set.clone());
        Ok(())
    }
}
