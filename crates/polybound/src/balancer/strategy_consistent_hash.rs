// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consistent-hash pick strategy.
//!
//! Jump consistent hash needs a stable bucket count and order, so this
//! strategy picks from the unfiltered node list. Dead buckets are skipped
//! by re-hashing with an incremented seed.

use std::net::IpAddr;

use super::{Node, PickMetadata, Status, Strategy};

/// Sticks requests of one site to one node.
#[derive(Default)]
pub struct ConsistentHashStrategy;

impl ConsistentHashStrategy {
    pub fn new() -> Self {
        ConsistentHashStrategy
    }
}

impl Strategy for ConsistentHashStrategy {
    fn pick(&self, all: &[Node], _filtered: &[Node], metadata: &PickMetadata) -> Option<Node> {
        if all.is_empty() {
            return None;
        }
        // with half of the nodes dead, 7 retries still land on a live one
        // with probability 1 - 0.5^7
        const MAX_RETRY: usize = 7;
        let buckets = all.len();
        let mut key = crc32fast::hash(hash_key(metadata).as_bytes()) as u64;
        for _ in 0..MAX_RETRY {
            let index = jump_hash(key, buckets);
            if all[index].status != Status::Dead {
                return Some(all[index].clone());
            }
            key = key.wrapping_add(1);
        }
        None
    }
}

/// The hash key: registered domain when the request names one, otherwise
/// the destination text (which includes the port).
fn hash_key(metadata: &PickMetadata) -> String {
    if let Some(domain) = &metadata.domain {
        if !domain.is_empty() {
            if let Some(site) = registered_domain(domain) {
                return site;
            }
        }
    }
    metadata.destination.to_string()
}

/// Effective-TLD-plus-one reduction: the last two labels, or three under a
/// well-known two-part public suffix. IPs and single labels yield `None`.
fn registered_domain(domain: &str) -> Option<String> {
    let domain = domain.trim_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.parse::<IpAddr>().is_ok() {
        return None;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return None;
    }
    const SECOND_LEVEL: [&str; 9] = ["co", "com", "net", "org", "gov", "edu", "ac", "mil", "sch"];
    let take = if labels.len() >= 3
        && labels[labels.len() - 1].len() == 2
        && SECOND_LEVEL.contains(&labels[labels.len() - 2])
    {
        3
    } else {
        2
    };
    Some(labels[labels.len() - take..].join("."))
}

/// Jump consistent hash: a bucket in `[0, num_buckets)` for the key.
fn jump_hash(mut key: u64, num_buckets: usize) -> usize {
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < num_buckets as i64 {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = ((b.wrapping_add(1)) as f64
            * ((1i64 << 31) as f64 / (((key >> 33) + 1) as f64))) as i64;
    }
    b as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Destination;
    use crate::balancer::tests::nodes_with_statuses;

    fn metadata(domain: &str) -> PickMetadata {
        PickMetadata {
            destination: Destination::new("10.0.0.1", 443),
            domain: (!domain.is_empty()).then(|| domain.to_string()),
        }
    }

    #[test]
    fn test_deterministic() {
        let nodes = nodes_with_statuses(&[Status::Alive; 10]);
        let strategy = ConsistentHashStrategy::new();
        let meta = metadata("cdn.files.example.com");
        let first = strategy.pick(&nodes, &[], &meta).unwrap().index;
        for _ in 0..8 {
            assert_eq!(strategy.pick(&nodes, &[], &meta).unwrap().index, first);
        }
    }

    #[test]
    fn test_subdomains_share_a_node() {
        let nodes = nodes_with_statuses(&[Status::Alive; 10]);
        let strategy = ConsistentHashStrategy::new();
        let a = strategy.pick(&nodes, &[], &metadata("a.example.com")).unwrap();
        let b = strategy.pick(&nodes, &[], &metadata("b.example.com")).unwrap();
        assert_eq!(a.index, b.index);
    }

    #[test]
    fn test_dead_bucket_retries_with_next_seed() {
        let mut nodes = nodes_with_statuses(&[Status::Alive; 10]);
        let strategy = ConsistentHashStrategy::new();
        let meta = metadata("sticky.example.com");
        let first = strategy.pick(&nodes, &[], &meta).unwrap().index;
        // kill exactly the bucket the key lands on
        nodes[first - 1].status = Status::Dead;
        let second = strategy.pick(&nodes, &[], &meta).unwrap();
        assert_ne!(second.index, first);
        assert_ne!(second.status, Status::Dead);
    }

    #[test]
    fn test_all_dead_gives_up() {
        let nodes = nodes_with_statuses(&[Status::Dead; 10]);
        let strategy = ConsistentHashStrategy::new();
        assert!(strategy.pick(&nodes, &[], &metadata("x.example.com")).is_none());
    }

    #[test]
    fn test_registered_domain() {
        assert_eq!(
            registered_domain("cdn.files.example.com"),
            Some("example.com".to_string())
        );
        assert_eq!(
            registered_domain("www.example.co.uk"),
            Some("example.co.uk".to_string())
        );
        assert_eq!(registered_domain("example.com"), Some("example.com".to_string()));
        assert_eq!(registered_domain("localhost"), None);
        assert_eq!(registered_domain("192.168.0.1"), None);
    }

    #[test]
    fn test_fallback_key_includes_port() {
        // no domain: the destination text keys the hash, port included
        let nodes = nodes_with_statuses(&[Status::Alive; 32]);
        let strategy = ConsistentHashStrategy::new();
        let a = PickMetadata {
            destination: Destination::new("10.1.2.3", 443),
            domain: None,
        };
        let b = PickMetadata {
            destination: Destination::new("10.1.2.3", 8443),
            domain: None,
        };
        let pick_a = strategy.pick(&nodes, &[], &a).unwrap().index;
        let pick_b = strategy.pick(&nodes, &[], &b).unwrap().index;
        // different ports may legally collide, but the keys must differ;
        // spot-check by comparing the raw hashes instead of the picks
        assert_ne!(
            crc32fast::hash(a.destination.to_string().as_bytes()),
            crc32fast::hash(b.destination.to_string().as_bytes())
        );
        let _ = (pick_a, pick_b);
    }

    #[test]
    fn test_jump_hash_range_and_stability() {
        for buckets in [1usize, 2, 10, 100] {
            for key in 0..200u64 {
                let bucket = jump_hash(key, buckets);
                assert!(bucket < buckets);
                assert_eq!(bucket, jump_hash(key, buckets));
            }
        }
    }
}
