// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! URL-test group.
//!
//! Owns a health checker with sampling 1: the decision only ever looks at
//! the latest measurement. Members within `tolerance` of the fastest are
//! treated as equally good, so the group does not flap between nodes that
//! differ by a few milliseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{GroupAdapter, GroupOptions};
use crate::adapter::{
    BoxPacketConn, BoxStream, Destination, Dialer, Network, NetworkSet, Outbound, OutboundGroup,
    OutboundManager, ProviderManager,
};
use crate::dialer::DialContext;
use crate::healthcheck::{HealthCheck, HealthCheckOptions, HistoryStorage, Rtt};
use crate::{Error, Result};

const DEFAULT_URLTEST_INTERVAL: Duration = Duration::from_secs(3 * 60);
const DEFAULT_TOLERANCE: Rtt = Rtt(50);

#[derive(Debug, Clone, Default)]
pub struct UrlTestOptions {
    pub group: GroupOptions,
    /// Probe URL; empty selects the default 204 endpoint.
    pub url: String,
    /// Probe period; default 3 minutes.
    pub interval: Option<Duration>,
    /// Delay band within which a slower member still counts as fastest;
    /// zero selects the default of 50 ms.
    pub tolerance: u16,
}

/// An outbound that dials through the member with the lowest latest RTT.
pub struct UrlTest {
    adapter: GroupAdapter,
    url: String,
    interval: Duration,
    tolerance: Rtt,
    global_history: Option<Arc<HistoryStorage>>,
    healthcheck: Mutex<Option<Arc<HealthCheck>>>,
}

impl UrlTest {
    pub fn new(
        tag: impl Into<String>,
        options: UrlTestOptions,
        global_history: Option<Arc<HistoryStorage>>,
    ) -> Result<Self> {
        let tolerance = if options.tolerance == 0 {
            DEFAULT_TOLERANCE
        } else {
            Rtt(options.tolerance)
        };
        Ok(UrlTest {
            adapter: GroupAdapter::new(tag, options.group)?,
            url: options.url,
            interval: options.interval.unwrap_or(DEFAULT_URLTEST_INTERVAL),
            tolerance,
            global_history,
            healthcheck: Mutex::new(None),
        })
    }

    /// Resolves members and starts the owned health checker.
    pub fn start(
        &self,
        manager: Arc<OutboundManager>,
        providers: &ProviderManager,
    ) -> Result<()> {
        self.adapter.init_providers(&manager, providers)?;
        let healthcheck = HealthCheck::new(
            self.adapter.providers(),
            manager,
            HealthCheckOptions {
                destination: self.url.clone(),
                interval: Some(self.interval),
                // the decision uses the latest measurement only
                sampling: 1,
                detour_of: Vec::new(),
            },
            self.global_history.clone(),
        );
        healthcheck.start()?;
        *self.healthcheck.lock() = Some(healthcheck);
        Ok(())
    }

    pub fn close(&self) {
        if let Some(healthcheck) = self.healthcheck.lock().take() {
            healthcheck.close();
        }
    }

    pub fn health_check(&self) -> Option<Arc<HealthCheck>> {
        self.healthcheck.lock().clone()
    }

    pub async fn check_all(&self) -> Result<HashMap<String, Rtt>> {
        match self.health_check() {
            Some(healthcheck) => healthcheck.check_all().await,
            None => Ok(HashMap::new()),
        }
    }

    fn latest(&self, outbound: &Arc<dyn Outbound>) -> Option<Rtt> {
        let healthcheck = self.healthcheck.lock();
        let healthcheck = healthcheck.as_ref()?;
        healthcheck
            .storages()
            .latest(outbound.tag())
            .map(|history| history.delay)
    }

    /// The member to dial for `network`.
    ///
    /// Prefers the member whose latest delay undercuts the current best by
    /// more than the tolerance; falls back deterministically to the first
    /// matching member when nothing has a usable measurement.
    pub fn select(&self, network: Network) -> Result<Arc<dyn Outbound>> {
        let mut min_delay = Rtt::FAILED;
        let mut min_outbound = None;
        let mut first_outbound = None;
        for outbound in self.adapter.outbounds() {
            if !outbound.networks().contains(network) {
                continue;
            }
            if first_outbound.is_none() {
                first_outbound = Some(outbound.clone());
            }
            let delay = match self.latest(&outbound) {
                Some(delay) if !delay.is_failed() => delay,
                _ => continue,
            };
            if min_delay.is_failed() || min_delay > Rtt(delay.0.saturating_add(self.tolerance.0)) {
                min_delay = delay;
                min_outbound = Some(outbound);
            }
        }
        if let Some(outbound) = min_outbound {
            return Ok(outbound);
        }
        if let Some(outbound) = first_outbound {
            return Ok(outbound);
        }
        Err(Error::NoOutboundAvailable(format!(
            "[{}] has no members",
            self.adapter.tag()
        )))
    }

    /// All other members in ascending delay order, unmeasured ones last.
    fn fallbacks(&self, used: &Arc<dyn Outbound>) -> Vec<Arc<dyn Outbound>> {
        let mut members: Vec<(Rtt, Arc<dyn Outbound>)> = self
            .adapter
            .outbounds()
            .into_iter()
            .filter(|outbound| !Arc::ptr_eq(outbound, used))
            .map(|outbound| {
                let delay = match self.latest(&outbound) {
                    Some(delay) if !delay.is_failed() => delay,
                    _ => Rtt(u16::MAX),
                };
                (delay, outbound)
            })
            .collect();
        members.sort_by_key(|(delay, _)| *delay);
        members.into_iter().map(|(_, outbound)| outbound).collect()
    }

    fn report_failure(&self, outbound: &Arc<dyn Outbound>) {
        if let Some(healthcheck) = self.health_check() {
            healthcheck.report_failure(outbound.as_ref());
        }
    }
}

#[async_trait]
impl Dialer for UrlTest {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        let outbound = self.select(Network::Tcp)?;
        let mut last_err = match outbound.dial_stream(cx, destination).await {
            Ok(stream) => return Ok(stream),
            Err(err) => err,
        };
        log::error!("[urltest[{}]] {}", self.adapter.tag(), last_err);
        self.report_failure(&outbound);
        for fallback in self.fallbacks(&outbound) {
            match fallback.dial_stream(cx, destination).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    log::error!("[urltest[{}]] {}", self.adapter.tag(), err);
                    self.report_failure(&fallback);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        let outbound = self.select(Network::Udp)?;
        let mut last_err = match outbound.dial_packet(cx, destination).await {
            Ok(conn) => return Ok(conn),
            Err(err) => err,
        };
        log::error!("[urltest[{}]] {}", self.adapter.tag(), last_err);
        self.report_failure(&outbound);
        for fallback in self.fallbacks(&outbound) {
            match fallback.dial_packet(cx, destination).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    log::error!("[urltest[{}]] {}", self.adapter.tag(), err);
                    self.report_failure(&fallback);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

impl Outbound for UrlTest {
    fn kind(&self) -> &str {
        "urltest"
    }

    fn tag(&self) -> &str {
        self.adapter.tag()
    }

    fn networks(&self) -> NetworkSet {
        NetworkSet::BOTH
    }

    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        Some(self)
    }
}

impl OutboundGroup for UrlTest {
    fn now(&self) -> String {
        match self.select(Network::Tcp) {
            Ok(outbound) => outbound.tag().to_string(),
            Err(_) => String::new(),
        }
    }

    fn all(&self) -> Vec<String> {
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

    async fn started_urltest(tags: &[&str]) -> UrlTest {
        let manager = Arc::new(OutboundManager::new());
        let providers = ProviderManager::new();
        providers.insert(Arc::new(MemoryProvider::new(
            "members",
            tags.iter()
                .map(|tag| Arc::new(BlockOutbound::new(*tag)) as Arc<dyn Outbound>)
                .collect(),
        )));
        let urltest = UrlTest::new(
            "ut",
            UrlTestOptions {
                group: GroupOptions {
                    providers: vec!["members".to_string()],
                    ..Default::default()
                },
                ..Default::default()
            },
            None,
        )
        .unwrap();
        urltest.start(manager, &providers).unwrap();
        urltest
    }

    #[tokio::test]
    async fn test_select_prefers_lowest_latest() {
        let urltest = started_urltest(&["a", "b", "c"]).await;
        let storages = urltest.health_check().unwrap().storages().clone();
        storages.put("a", Rtt(200));
        storages.put("b", Rtt(80));
        storages.put("c", Rtt::FAILED);
        assert_eq!(urltest.select(Network::Tcp).unwrap().tag(), "b");
        assert_eq!(urltest.now(), "b");
        urltest.close();
    }

    #[tokio::test]
    async fn test_tolerance_keeps_earlier_member() {
        let urltest = started_urltest(&["a", "b"]).await;
        let storages = urltest.health_check().unwrap().storages().clone();
        storages.put("a", Rtt(100));
        // 30 ms faster, within the 50 ms tolerance: no switch
        storages.put("b", Rtt(70));
        assert_eq!(urltest.select(Network::Tcp).unwrap().tag(), "a");
        // a real improvement switches
        storages.put("b", Rtt(30));
        assert_eq!(urltest.select(Network::Tcp).unwrap().tag(), "b");
        urltest.close();
    }

    #[tokio::test]
    async fn test_unmeasured_falls_back_to_first_matching() {
        let urltest = started_urltest(&["a", "b"]).await;
        assert_eq!(urltest.select(Network::Tcp).unwrap().tag(), "a");
        urltest.close();
    }

    #[tokio::test]
    async fn test_empty_group_errors() {
        let urltest = started_urltest(&[]).await;
        assert!(urltest.select(Network::Tcp).is_err());
        assert_eq!(urltest.now(), "");
        urltest.close();
    }

    #[tokio::test]
    async fn test_failed_dial_reports_failure() {
        let urltest = started_urltest(&["a", "b"]).await;
        let storages = urltest.health_check().unwrap().storages().clone();
        storages.put("a", Rtt(10));
        storages.put("b", Rtt(90));
        let err = urltest
            .dial_stream(&DialContext::new(), &Destination::new("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        // both members got a synthetic failure appended
        assert_eq!(storages.stats("a").fail, 1);
        assert_eq!(storages.stats("b").fail, 1);
        urltest.close();
    }
}
