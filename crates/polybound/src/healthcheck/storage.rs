// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-endpoint sliding RTT history and statistics.

use std::time::{Duration, SystemTime};

use super::Rtt;

/// One probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct History {
    /// Wall-clock time of the probe. `SystemTime` carries no monotonic
    /// component, so comparisons stay correct across sleep/suspend.
    pub time: SystemTime,
    pub delay: Rtt,
}

/// Sliding-window summary of a storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Total number of health checks in the window.
    pub all: usize,
    /// Number of failed health checks in the window.
    pub fail: usize,
    /// Standard deviation of the non-failed RTTs.
    pub deviation: Rtt,
    /// Average of the non-failed RTTs.
    pub average: Rtt,
    pub max: Rtt,
    pub min: Rtt,
    pub latest: Rtt,
    /// Earliest future time at which the window boundary changes.
    pub expires: Option<SystemTime>,
}

/// Fixed-capacity ring of probe results. Not thread safe; [`super::Storages`]
/// serializes access.
#[derive(Debug)]
pub struct Storage {
    idx: usize,
    cap: usize,
    validity: Duration,
    history: Vec<Option<History>>,
    stats: Stats,
}

impl Storage {
    pub fn new(cap: usize, validity: Duration) -> Self {
        let cap = cap.max(1);
        Storage {
            idx: 0,
            cap,
            validity,
            history: vec![None; cap],
            stats: Stats::default(),
        }
    }

    /// Writes a probe result into the next ring slot and invalidates the
    /// cached statistics.
    pub fn put(&mut self, delay: Rtt) {
        self.idx = self.offset(1);
        self.history[self.idx] = Some(History {
            time: SystemTime::now(),
            delay,
        });
        self.stats = Stats::default();
    }

    /// The entry at `offset` steps behind the latest, ignoring validity.
    pub fn get(&self, offset: isize) -> Option<History> {
        self.history[self.offset(offset)]
    }

    /// The most recently written entry.
    pub fn latest(&self) -> Option<History> {
        self.get(0)
    }

    /// All written entries, newest first, ignoring validity.
    pub fn all(&self) -> Vec<History> {
        let mut all = Vec::with_capacity(self.cap);
        for i in 0..self.cap {
            match self.history[self.offset(-(i as isize))] {
                Some(entry) => all.push(entry),
                None => break,
            }
        }
        all
    }

    /// Statistics over the non-expired window, cached until the window
    /// boundary changes. Callers must hold exclusive access: this writes
    /// the cache.
    pub fn stats(&mut self) -> Stats {
        let now = SystemTime::now();
        if let Some(expires) = self.stats.expires {
            if now < expires {
                return self.stats;
            }
        }
        self.refresh_stats(now);
        self.stats
    }

    fn refresh_stats(&mut self, now: SystemTime) {
        self.stats = Stats::default();
        let latest = match self.history[self.idx] {
            Some(entry) => entry,
            None => return,
        };
        if now > latest.time + self.validity {
            return;
        }
        self.stats.latest = latest.delay;

        let mut min = Rtt(u16::MAX);
        let mut sum: u32 = 0;
        let mut cnt: usize = 0;
        let mut valid = Vec::with_capacity(self.cap);
        let mut expires_at = None;
        for i in 0..self.cap {
            let entry = match self.history[self.offset(-(i as isize))] {
                Some(entry) => entry,
                None => break,
            };
            let entry_expires = entry.time + self.validity;
            if entry_expires < now {
                // the latter is invalid, so are the formers
                break;
            }
            // the time when the oldest item expires
            expires_at = Some(entry_expires);
            if entry.delay.is_failed() {
                self.stats.fail += 1;
                continue;
            }
            cnt += 1;
            sum += entry.delay.0 as u32;
            valid.push(entry.delay);
            if self.stats.max < entry.delay {
                self.stats.max = entry.delay;
            }
            if min > entry.delay {
                min = entry.delay;
            }
        }

        self.stats.expires = expires_at;
        self.stats.all = cnt + self.stats.fail;
        if cnt > 0 {
            self.stats.average = Rtt((sum / cnt as u32) as u16);
        }
        if self.stats.all == 0 || self.stats.fail == self.stats.all {
            return;
        }
        self.stats.min = min;
        let std = if cnt < 2 {
            // not enough data for a standard deviation, assume half of the
            // average rtt; otherwise one-round-tested nodes (deviation 0)
            // would always win over nodes tested for 2+ rounds
            (self.stats.average.0 / 2) as f64
        } else {
            let average = self.stats.average.0 as f64;
            let variance: f64 = valid
                .iter()
                .map(|rtt| (rtt.0 as f64 - average).powi(2))
                .sum();
            (variance / cnt as f64).sqrt()
        };
        self.stats.deviation = Rtt(std as u16);
    }

    fn offset(&self, n: isize) -> usize {
        let cap = self.cap as isize;
        let mut idx = self.idx as isize + n;
        idx %= cap;
        if idx < 0 {
            idx += cap;
        }
        idx as usize
    }
}
