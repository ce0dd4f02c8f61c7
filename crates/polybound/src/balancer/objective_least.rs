// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Least-load / least-ping objective.

use std::cmp::Ordering;

use super::{Node, Objective, QualifiedObjective};
use crate::healthcheck::Rtt;

/// Which statistic the least objective minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeastMetric {
    /// Standard deviation (least load).
    Deviation,
    /// Average RTT (least ping).
    Average,
}

impl LeastMetric {
    pub fn of(self, node: &Node) -> Rtt {
        match self {
            LeastMetric::Deviation => node.stats.deviation,
            LeastMetric::Average => node.stats.average,
        }
    }
}

/// Selects the nodes with the least metric value, expanded by baselines.
pub struct LeastObjective {
    qualified: QualifiedObjective,
    expected: usize,
    baselines: Vec<Rtt>,
    metric: LeastMetric,
}

impl LeastObjective {
    pub fn new(expected: usize, baselines: Vec<Rtt>, metric: LeastMetric) -> Self {
        LeastObjective {
            qualified: QualifiedObjective::new(),
            expected,
            baselines,
            metric,
        }
    }
}

impl Objective for LeastObjective {
    fn filter(&self, all: &[Node]) -> Vec<Node> {
        // candidates are qualified, alive or all nodes, per the fallback
        let mut nodes = self.qualified.filter(all);
        self.sort(&mut nodes);
        // least_nodes always selects at least one node
        least_nodes(nodes, self.expected, &self.baselines, self.metric)
    }

    fn sort(&self, nodes: &mut [Node]) {
        sort_by_least(nodes, self.metric);
    }
}

/// Truncates sorted nodes according to `expected` and `baselines`.
///
/// 1. no baselines, expected 0: the top node.
/// 2. no baselines, expected > 0: `expected` nodes.
/// 3. baselines, expected > 0: `expected` nodes, plus those near them
///    according to the baselines.
/// 4. baselines, expected 0: walk all baselines until anything is
///    selected, else the top node.
pub fn least_nodes(
    nodes: Vec<Node>,
    expected: usize,
    baselines: &[Rtt],
    metric: LeastMetric,
) -> Vec<Node> {
    if nodes.is_empty() {
        return nodes;
    }
    let available = nodes.len();
    if expected > available {
        return nodes;
    }
    let expected = expected.max(1);
    if baselines.is_empty() {
        return nodes[..expected].to_vec();
    }

    let mut count = 0;
    // walk baselines until enough nodes are selected; a status change
    // restarts the walk so one baseline never mixes status tiers
    let mut i = 0;
    while i < baselines.len() {
        let baseline = baselines[i];
        let current_status = nodes[count].status;
        let mut next = i + 1;
        for j in count..available {
            if nodes[j].status != current_status {
                next = 0;
                break;
            }
            if metric.of(&nodes[j]) >= baseline {
                break;
            }
            count = j + 1;
        }
        if count >= expected {
            break;
        }
        i = next;
    }
    if count < expected {
        count = expected;
    }
    nodes[..count].to_vec()
}

/// Sorts by status, then the metric, failure count, sample count and the
/// random tie-break.
pub fn sort_by_least(nodes: &mut [Node], metric: LeastMetric) {
    nodes.sort_by(|left, right| {
        right
            .status
            .cmp(&left.status)
            .then_with(|| {
                let (l, r) = (metric.of(left), metric.of(right));
                if l == r {
                    Ordering::Equal
                } else if l.is_failed() {
                    // a failed metric orders after any real value
                    Ordering::Greater
                } else if r.is_failed() {
                    Ordering::Less
                } else {
                    l.cmp(&r)
                }
            })
            .then_with(|| left.stats.fail.cmp(&right.stats.fail))
            .then_with(|| left.stats.all.cmp(&right.stats.all))
            // randomize perfect ties so equal nodes share the load
            .then_with(|| right.rand.cmp(&left.rand))
    });
}
