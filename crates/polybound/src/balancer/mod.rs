// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Load balancer: node view construction, objectives and strategies.

mod node;
mod objective;
mod objective_alive;
mod objective_least;
mod strategy;
mod strategy_consistent_hash;
mod strategy_round_robin;

pub use node::{Node, Status};
pub use objective::{
    Objective, OBJECTIVE_ALIVE, OBJECTIVE_LEAST_LOAD, OBJECTIVE_LEAST_PING, OBJECTIVE_QUALIFIED,
    STRATEGY_CONSISTENT_HASH, STRATEGY_RANDOM, STRATEGY_ROUND_ROBIN,
};
pub use objective_alive::{AliveObjective, QualifiedObjective};
pub use objective_least::{least_nodes, sort_by_least, LeastMetric, LeastObjective};
pub use strategy::{PickMetadata, RandomStrategy, Strategy};
pub use strategy_consistent_hash::ConsistentHashStrategy;
pub use strategy_round_robin::RoundRobinStrategy;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::adapter::{real_outbound, Network, Outbound, OutboundManager, Provider};
use crate::healthcheck::{HealthCheck, HealthCheckOptions, HistoryStorage, Rtt};
use crate::{Error, Result};

/// Node selection settings.
#[derive(Debug, Clone, Default)]
pub struct PickOptions {
    /// Objective name; empty selects `alive`.
    pub objective: String,
    /// Strategy name; empty selects `random`.
    pub strategy: String,
    /// Max acceptable failures within the sampling window.
    pub max_fail: u32,
    /// Max acceptable average RTT; zero disables the check.
    pub max_rtt: Duration,
    /// Expected number of nodes the least objectives select.
    pub expected: u32,
    /// RTT baselines for the least objectives.
    pub baselines: Vec<Duration>,
}

/// Full balancer settings.
#[derive(Debug, Clone, Default)]
pub struct LoadBalanceOptions {
    pub check: HealthCheckOptions,
    pub pick: PickOptions,
}

/// The load balancer.
pub struct Balancer {
    healthcheck: Arc<HealthCheck>,
    providers: Vec<Arc<dyn Provider>>,
    objective: Box<dyn Objective>,
    strategy: Box<dyn Strategy>,
    objective_name: String,
    strategy_name: String,
    max_rtt: Rtt,
    max_fail_rate: f32,
    networks: Mutex<Option<(bool, bool)>>,
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("objective_name", &self.objective_name)
            .field("strategy_name", &self.strategy_name)
            .finish()
    }
}

impl Balancer {
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        manager: Arc<OutboundManager>,
        mut options: LoadBalanceOptions,
        global_history: Option<Arc<HistoryStorage>>,
    ) -> Result<Self> {
        if options.pick.strategy.is_empty() {
            options.pick.strategy = STRATEGY_RANDOM.to_string();
        }
        if options.pick.objective.is_empty() {
            options.pick.objective = OBJECTIVE_ALIVE.to_string();
        }
        let expected = options.pick.expected as usize;
        let baselines: Vec<Rtt> = options
            .pick
            .baselines
            .iter()
            .map(|d| Rtt::from_duration(*d))
            .collect();
        let objective: Box<dyn Objective> = match options.pick.objective.as_str() {
            OBJECTIVE_ALIVE => Box::new(AliveObjective::new()),
            OBJECTIVE_QUALIFIED => Box::new(QualifiedObjective::new()),
            OBJECTIVE_LEAST_LOAD => Box::new(LeastObjective::new(
                expected,
                baselines,
                LeastMetric::Deviation,
            )),
            OBJECTIVE_LEAST_PING => Box::new(LeastObjective::new(
                expected,
                baselines,
                LeastMetric::Average,
            )),
            other => return Err(Error::UnknownObjective(other.to_string())),
        };
        let strategy: Box<dyn Strategy> = match options.pick.strategy.as_str() {
            STRATEGY_RANDOM => Box::new(RandomStrategy::new()),
            STRATEGY_ROUND_ROBIN => Box::new(RoundRobinStrategy::new()),
            STRATEGY_CONSISTENT_HASH => {
                if options.pick.objective != OBJECTIVE_ALIVE {
                    return Err(Error::Config(
                        "consistenthash strategy works only with 'alive' objective".to_string(),
                    ));
                }
                Box::new(ConsistentHashStrategy::new())
            }
            other => return Err(Error::UnknownStrategy(other.to_string())),
        };

        // the checker applies defaults, e.g. the sampling that scales the
        // fail-rate threshold
        let healthcheck = HealthCheck::new(
            providers.clone(),
            manager,
            options.check.clone(),
            global_history,
        );
        let max_fail_rate = options.pick.max_fail as f32 / healthcheck.sampling() as f32;
        Ok(Balancer {
            healthcheck,
            providers,
            objective,
            strategy,
            objective_name: options.pick.objective,
            strategy_name: options.pick.strategy,
            max_rtt: Rtt::from_duration(options.pick.max_rtt),
            max_fail_rate,
            networks: Mutex::new(None),
        })
    }

    pub fn health_check(&self) -> &Arc<HealthCheck> {
        &self.healthcheck
    }

    pub fn start(&self) -> Result<()> {
        self.healthcheck.start()
    }

    pub fn close(&self) {
        self.healthcheck.close()
    }

    /// Picks an outbound for a request, or `None` when nothing is usable.
    ///
    /// Pure computation over a fresh node view; it never suspends.
    pub fn pick(&self, network: Network, metadata: &PickMetadata) -> Option<Arc<dyn Outbound>> {
        let all = self.nodes(Some(network));
        let filtered = self.objective.filter(&all);
        let picked = self.strategy.pick(&all, &filtered, metadata)?;
        Some(picked.outbound)
    }

    /// All nodes for the network, with a running index and fresh stats.
    pub fn nodes(&self, network: Option<Network>) -> Vec<Node> {
        let mut all = Vec::new();
        let mut index = 0;
        for provider in &self.providers {
            for outbound in provider.outbounds() {
                index += 1;
                if let Some(network) = network {
                    if !outbound.networks().contains(network) {
                        continue;
                    }
                }
                let real = if outbound.as_group().is_some() {
                    match real_outbound(outbound.clone()) {
                        Ok(real) => real,
                        Err(_) => continue,
                    }
                } else {
                    outbound.clone()
                };
                let mut node = Node::new(outbound, index);
                node.stats = self.healthcheck.storages().stats(real.tag());
                node.calc_status(self.max_rtt, self.max_fail_rate);
                all.push(node);
            }
        }
        all
    }

    /// Networks this balancer can serve, derived once from its nodes.
    pub fn networks(&self) -> Vec<Network> {
        let mut cached = self.networks.lock();
        let (tcp, udp) = *cached.get_or_insert_with(|| {
            let mut tcp = false;
            let mut udp = false;
            for node in self.nodes(None) {
                let networks = node.outbound.networks();
                tcp |= networks.tcp;
                udp |= networks.udp;
                if tcp && udp {
                    break;
                }
            }
            (tcp, udp)
        });
        let mut networks = Vec::new();
        if tcp {
            networks.push(Network::Tcp);
        }
        if udp {
            networks.push(Network::Udp);
        }
        networks
    }

    /// Logs every node, available candidates first.
    pub fn log_nodes(&self) {
        let mut all = self.nodes(None);
        let available = self.objective.filter(&all).len();
        log::info!(
            "[balancer] {}/{}, {} of {} nodes available",
            self.objective_name,
            self.strategy_name,
            available,
            all.len()
        );
        self.objective.sort(&mut all);
        log::info!("[balancer] === nodes available ===");
        for (i, node) in all.iter().enumerate() {
            if i == available {
                log::info!("[balancer] === nodes unavailable ===");
            }
            log::info!("[balancer] {}", node);
        }
    }

    /// Schedules a full check round after a host interface change.
    pub fn interface_updated(&self) {
        self.healthcheck.interface_updated();
    }
}
