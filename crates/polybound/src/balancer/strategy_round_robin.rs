// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Round-robin pick strategy.

use parking_lot::Mutex;

use super::{Node, PickMetadata, Strategy};

/// Cycles through candidates by their round index.
///
/// Candidates are scanned in ascending index order and the first one past
/// the previously picked index wins; when none is left the scan wraps to
/// the lowest index. Node indices are stable within a round, so the cycle
/// survives membership churn between rounds.
pub struct RoundRobinStrategy {
    last_index: Mutex<i64>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        RoundRobinStrategy {
            last_index: Mutex::new(-1),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        RoundRobinStrategy::new()
    }
}

impl Strategy for RoundRobinStrategy {
    fn pick(&self, _all: &[Node], filtered: &[Node], _metadata: &PickMetadata) -> Option<Node> {
        if filtered.is_empty() {
            return None;
        }
        let mut candidates = filtered.to_vec();
        candidates.sort_by_key(|node| node.index);
        let mut last_index = self.last_index.lock();
        for node in &candidates {
            if node.index as i64 > *last_index {
                *last_index = node.index as i64;
                return Some(node.clone());
            }
        }
        *last_index = candidates[0].index as i64;
        Some(candidates[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::tests::nodes_with_indices;

    #[test]
    fn test_cycles_in_index_order() {
        let nodes = nodes_with_indices(&[1, 3, 5]);
        let strategy = RoundRobinStrategy::new();
        let metadata = PickMetadata::default();
        let picks: Vec<usize> = (0..4)
            .map(|_| strategy.pick(&nodes, &nodes, &metadata).unwrap().index)
            .collect();
        assert_eq!(picks, vec![1, 3, 5, 1]);
    }

    #[test]
    fn test_survives_membership_churn() {
        let strategy = RoundRobinStrategy::new();
        let metadata = PickMetadata::default();
        let first = nodes_with_indices(&[1, 2, 3]);
        assert_eq!(strategy.pick(&first, &first, &metadata).unwrap().index, 1);
        // node 2 disappeared between rounds
        let second = nodes_with_indices(&[1, 3]);
        assert_eq!(strategy.pick(&second, &second, &metadata).unwrap().index, 3);
        assert_eq!(strategy.pick(&second, &second, &metadata).unwrap().index, 1);
    }

    #[test]
    fn test_empty() {
        let strategy = RoundRobinStrategy::new();
        assert!(strategy.pick(&[], &[], &PickMetadata::default()).is_none());
    }
}
