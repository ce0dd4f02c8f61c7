// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared latest-result observer.
//!
//! Different health checkers can have different destinations and sampling,
//! so each keeps its own [`super::Storages`]; this storage only mirrors the
//! most recent result per tag for display surfaces. It is updated even for
//! all-failed rounds so a UI can show recent failures.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::History;

#[derive(Default)]
pub struct HistoryStorage {
    entries: Mutex<HashMap<String, History>>,
}

impl HistoryStorage {
    pub fn new() -> Self {
        HistoryStorage::default()
    }

    pub fn store(&self, tag: &str, history: History) {
        self.entries.lock().insert(tag.to_string(), history);
    }

    pub fn load(&self, tag: &str) -> Option<History> {
        self.entries.lock().get(tag).copied()
    }

    pub fn delete(&self, tag: &str) {
        self.entries.lock().remove(tag);
    }
}
