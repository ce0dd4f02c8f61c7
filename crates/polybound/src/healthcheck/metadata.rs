// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared per-round check state.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Collects network connectivity status and checked tags for one round.
///
/// Checks run asynchronously, so success results may arrive before failure
/// results query connectivity. Two cases matter:
///
/// 1. Any one check succeeded: the network is known to be available.
/// 2. Every check failed: indistinguishable from the network being down.
///    Health checking exists to tell which nodes are better; an all-failed
///    round contributes nothing to that objective, so it is treated as a
///    network outage and its results are dropped.
#[derive(Default)]
pub struct MetaData {
    inner: Mutex<MetaDataInner>,
}

#[derive(Default)]
struct MetaDataInner {
    any_success: bool,
    checked: HashSet<String>,
}

impl MetaData {
    pub fn new() -> Self {
        MetaData::default()
    }

    /// Marks the outbound of `tag` as scheduled in this round. Returns
    /// `false` when it was already scheduled.
    pub fn report_checked(&self, tag: &str) -> bool {
        self.inner.lock().checked.insert(tag.to_string())
    }

    pub fn checked(&self, tag: &str) -> bool {
        self.inner.lock().checked.contains(tag)
    }

    /// Reports one successful check: the network is up.
    pub fn report_success(&self) {
        self.inner.lock().any_success = true;
    }

    /// Whether any check succeeded. `false` means all nodes are down, or
    /// the network is unavailable.
    pub fn any_success(&self) -> bool {
        self.inner.lock().any_success
    }
}
