// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tag-keyed collection of RTT storages.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::{History, Rtt, Stats, Storage};

/// The storages for different tags (nodes).
///
/// One exclusive lock guards the whole map: `stats()` writes the per-storage
/// cache, so a shared lock would not be sound there, and the remaining
/// operations are cheap enough not to justify a second locking scheme.
pub struct Storages {
    cap: usize,
    validity: Duration,
    storages: Mutex<HashMap<String, Storage>>,
}

impl Storages {
    pub fn new(cap: usize, validity: Duration) -> Self {
        Storages {
            cap,
            validity,
            storages: Mutex::new(HashMap::new()),
        }
    }

    /// The latest history for the tag.
    pub fn latest(&self, tag: &str) -> Option<History> {
        self.storages.lock().get(tag).and_then(|s| s.latest())
    }

    /// All histories for the tag, newest first.
    pub fn all(&self, tag: &str) -> Vec<History> {
        self.storages
            .lock()
            .get(tag)
            .map(|s| s.all())
            .unwrap_or_default()
    }

    /// Statistics for the tag; empty stats for an unknown tag.
    pub fn stats(&self, tag: &str) -> Stats {
        self.storages
            .lock()
            .get_mut(tag)
            .map(|s| s.stats())
            .unwrap_or_default()
    }

    /// Records a probe result, creating the storage on first write.
    pub fn put(&self, tag: &str, delay: Rtt) {
        let mut storages = self.storages.lock();
        let storage = storages
            .entry(tag.to_string())
            .or_insert_with(|| Storage::new(self.cap, self.validity));
        storage.put(delay);
    }

    /// Removes the storage for the tag.
    pub fn delete(&self, tag: &str) {
        self.storages.lock().remove(tag);
    }

    /// Tags that currently have a storage.
    pub fn list(&self) -> Vec<String> {
        self.storages.lock().keys().cloned().collect()
    }
}
