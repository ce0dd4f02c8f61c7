// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Load-balance group.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{GroupAdapter, GroupOptions};
use crate::adapter::{
    BoxPacketConn, BoxStream, Destination, Dialer, Network, NetworkSet, Outbound, OutboundGroup,
    OutboundManager, ProviderManager,
};
use crate::balancer::{Balancer, LoadBalanceOptions, PickMetadata};
use crate::dialer::DialContext;
use crate::healthcheck::{HistoryStorage, Rtt};
use crate::{Error, Result};

const MAX_DIAL_RETRY: usize = 5;

/// An outbound that dials through a balancer pick, re-picking on failure.
pub struct LoadBalance {
    adapter: GroupAdapter,
    options: LoadBalanceOptions,
    global_history: Option<Arc<HistoryStorage>>,
    balancer: Mutex<Option<Arc<Balancer>>>,
}

impl LoadBalance {
    pub fn new(
        tag: impl Into<String>,
        group: GroupOptions,
        options: LoadBalanceOptions,
        global_history: Option<Arc<HistoryStorage>>,
    ) -> Result<Self> {
        Ok(LoadBalance {
            adapter: GroupAdapter::new(tag, group)?,
            options,
            global_history,
            balancer: Mutex::new(None),
        })
    }

    /// Resolves members, builds the balancer and starts its checker.
    pub fn start(
        &self,
        manager: Arc<OutboundManager>,
        providers: &ProviderManager,
    ) -> Result<()> {
        self.adapter.init_providers(&manager, providers)?;
        let balancer = Arc::new(Balancer::new(
            self.adapter.providers(),
            manager,
            self.options.clone(),
            self.global_history.clone(),
        )?);
        balancer.start()?;
        *self.balancer.lock() = Some(balancer);
        Ok(())
    }

    pub fn close(&self) {
        if let Some(balancer) = self.balancer.lock().take() {
            balancer.close();
        }
    }

    pub fn balancer(&self) -> Option<Arc<Balancer>> {
        self.balancer.lock().clone()
    }

    pub async fn check_all(&self) -> Result<HashMap<String, Rtt>> {
        match self.balancer() {
            Some(balancer) => balancer.health_check().check_all().await,
            None => Ok(HashMap::new()),
        }
    }

    fn pick(&self, network: Network, destination: &Destination) -> Option<Arc<dyn Outbound>> {
        let balancer = self.balancer()?;
        let metadata = PickMetadata {
            destination: destination.clone(),
            domain: domain_of(destination),
        };
        balancer.pick(network, &metadata)
    }
}

/// The destination host, when it is a name rather than a literal address.
fn domain_of(destination: &Destination) -> Option<String> {
    if destination.host.is_empty() || destination.host.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some(destination.host.clone())
}

#[async_trait]
impl Dialer for LoadBalance {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        let mut last_err = None;
        for _ in 0..MAX_DIAL_RETRY {
            let picked = match self.pick(Network::Tcp, destination) {
                Some(picked) => picked,
                None => {
                    last_err = Some(Error::NoOutboundAvailable("nothing to pick".to_string()));
                    break;
                }
            };
            match picked.dial_stream(cx, destination).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    log::error!("[loadbalance[{}]] {}", self.adapter.tag(), err);
                    if let Some(balancer) = self.balancer() {
                        balancer.health_check().report_failure(picked.as_ref());
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NoOutboundAvailable("nothing to pick".to_string())))
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        let mut last_err = None;
        for _ in 0..MAX_DIAL_RETRY {
            let picked = match self.pick(Network::Udp, destination) {
                Some(picked) => picked,
                None => {
                    last_err = Some(Error::NoOutboundAvailable("nothing to pick".to_string()));
                    break;
                }
            };
            match picked.dial_packet(cx, destination).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    log::error!("[loadbalance[{}]] {}", self.adapter.tag(), err);
                    if let Some(balancer) = self.balancer() {
                        balancer.health_check().report_failure(picked.as_ref());
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NoOutboundAvailable("nothing to pick".to_string())))
    }
}

impl Outbound for LoadBalance {
    fn kind(&self) -> &str {
        "loadbalance"
    }

    fn tag(&self) -> &str {
        self.adapter.tag()
    }

    fn networks(&self) -> NetworkSet {
        match self.balancer() {
            Some(balancer) => {
                let networks = balancer.networks();
                NetworkSet {
                    tcp: networks.contains(&Network::Tcp),
                    udp: networks.contains(&Network::Udp),
                }
            }
            None => NetworkSet::BOTH,
        }
    }

    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        Some(self)
    }
}

impl OutboundGroup for LoadBalance {
    /// Tag of the node a sentinel TCP pick lands on right now.
    fn now(&self) -> String {
        match self.pick(Network::Tcp, &Destination::default()) {
            Some(picked) => picked.tag().to_string(),
            None => String::new(),
        }
    }

    fn all(&self) -> Vec<String> {
        if let Some(balancer) = self.balancer() {
            balancer.log_nodes();
        }
        self.adapter.all_tags()
    }

    fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.adapter.outbounds()
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.adapter.outbound(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::BlockOutbound;
    use crate::provider::MemoryProvider;

    async fn started_group(tags: &[&str]) -> LoadBalance {
        let manager = Arc::new(OutboundManager::new());
        let providers = ProviderManager::new();
        providers.insert(Arc::new(MemoryProvider::new(
            "members",
            tags.iter()
                .map(|tag| Arc::new(BlockOutbound::new(*tag)) as Arc<dyn Outbound>)
                .collect(),
        )));
        let group = LoadBalance::new(
            "lb",
            GroupOptions {
                providers: vec!["members".to_string()],
                ..Default::default()
            },
            LoadBalanceOptions::default(),
            None,
        )
        .unwrap();
        group.start(manager, &providers).unwrap();
        group
    }

    #[tokio::test]
    async fn test_dial_reports_failures_and_retries() {
        let group = started_group(&["a", "b"]).await;
        let err = group
            .dial_stream(&DialContext::new(), &Destination::new("target.example", 443))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // five retries, each recording one synthetic failure somewhere
        let storages = group.balancer().unwrap().health_check().storages().clone();
        let failures: usize = storages
            .list()
            .iter()
            .map(|tag| storages.stats(tag).fail)
            .sum();
        assert!(failures >= 1);
        group.close();
    }

    #[tokio::test]
    async fn test_now_names_a_member() {
        let group = started_group(&["a", "b"]).await;
        let now = group.now();
        assert!(now == "a" || now == "b");
        group.close();
    }

    #[tokio::test]
    async fn test_empty_group_dial_fails() {
        let group = started_group(&[]).await;
        let err = group
            .dial_stream(&DialContext::new(), &Destination::new("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoOutboundAvailable(_)));
        group.close();
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of(&Destination::new("site.example", 443)),
            Some("site.example".to_string())
        );
        assert_eq!(domain_of(&Destination::new("10.0.0.1", 443)), None);
        assert_eq!(domain_of(&Destination::default()), None);
    }
}
