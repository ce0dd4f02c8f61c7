// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-round node view.

use std::sync::Arc;

use crate::adapter::Outbound;
use crate::healthcheck::{Rtt, Stats};

/// Health status of a node. Better statuses order last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Dead,
    /// Not tested yet.
    Unknown,
    Alive,
    Qualified,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Dead => f.write_str("x"),
            Status::Unknown => f.write_str("?"),
            Status::Alive => f.write_str("*"),
            Status::Qualified => f.write_str("OK"),
        }
    }
}

/// A balancer node: one outbound joined with its health view.
///
/// Constructed fresh for every pick round and never shared across calls.
#[derive(Clone)]
pub struct Node {
    pub outbound: Arc<dyn Outbound>,
    /// Running 1-based index, stable within a single round.
    pub index: usize,
    pub status: Status,
    pub stats: Stats,
    /// Uniform random tie-break in `[0, 2^31)`.
    pub(crate) rand: u32,
}

impl Node {
    pub fn new(outbound: Arc<dyn Outbound>, index: usize) -> Self {
        Node {
            outbound,
            index,
            status: Status::Unknown,
            stats: Stats::default(),
            rand: fastrand::u32(..0x8000_0000),
        }
    }

    /// Recomputes the status from the stats and the given thresholds.
    pub fn calc_status(&mut self, max_rtt: Rtt, max_fail_rate: f32) {
        self.status = node_status(&self.stats, max_rtt, max_fail_rate);
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} [{}] STD={} AVG={} Latest={} FAIL={}/{}",
            self.index,
            self.status,
            self.outbound.tag(),
            self.stats.deviation,
            self.stats.average,
            self.stats.latest,
            self.stats.fail,
            self.stats.all,
        )
    }
}

/// Status of a node according to its statistics and thresholds.
fn node_status(stats: &Stats, max_rtt: Rtt, max_fail_rate: f32) -> Status {
    if stats.all == 0 {
        // untested
        return Status::Unknown;
    }
    if stats.latest.is_failed() {
        return Status::Dead;
    }
    if stats.fail > 0 && stats.fail as f32 / stats.all as f32 > max_fail_rate {
        return Status::Alive;
    }
    if !max_rtt.is_failed() && stats.average > max_rtt {
        return Status::Alive;
    }
    Status::Qualified
}
