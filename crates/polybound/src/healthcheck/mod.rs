// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Health checking for balancers and url-test groups.
//!
//! A [`HealthCheck`] probes every outbound of its providers on a schedule
//! and records round-trip times into per-tag sliding [`Storage`]s. Probe
//! rounds where nothing succeeded are treated as a network outage and not
//! recorded, so a dead uplink does not poison every node's window.

mod history;
mod metadata;
mod rtt;
mod storage;
mod storages;

pub use history::HistoryStorage;
pub use metadata::MetaData;
pub use rtt::Rtt;
pub use storage::{History, Stats, Storage};
pub use storages::Storages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::{as_dialer, real_outbound, Outbound, OutboundManager, Provider};
use crate::batch::Batch;
use crate::dialer::DialContext;
use crate::transport::url_test;
use crate::{Error, Result};

/// Per-probe connect/request budget.
pub const TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes in flight at once within one round.
const CHECK_CONCURRENCY: usize = 10;

const DEFAULT_DESTINATION: &str = "https://www.gstatic.com/generate_204";
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_SAMPLING: usize = 10;

/// Health check settings.
#[derive(Debug, Clone, Default)]
pub struct HealthCheckOptions {
    /// URL probed per outbound; empty selects the default 204 endpoint.
    pub destination: String,
    /// Probe period; `None` selects the component default, floored at 10 s.
    pub interval: Option<Duration>,
    /// Ring capacity per outbound; 0 selects the default of 10.
    pub sampling: usize,
    /// Outbound tags the probe must tunnel through, in order.
    pub detour_of: Vec<String>,
}

/// The health checker for balancers.
pub struct HealthCheck {
    storages: Arc<Storages>,
    global_history: Option<Arc<HistoryStorage>>,
    providers: Vec<Arc<dyn Provider>>,
    providers_by_tag: HashMap<String, Arc<dyn Provider>>,
    manager: Arc<OutboundManager>,

    destination: String,
    interval: Duration,
    sampling: usize,
    detour_tags: Vec<String>,
    detour_of: Mutex<Vec<Arc<dyn Outbound>>>,

    cancel: Mutex<Option<CancellationToken>>,
}

impl HealthCheck {
    /// Creates a checker.
    ///
    /// The global history is optional; it only mirrors latest results for
    /// display. Each checker keeps its own storages since destination and
    /// sampling differ between checkers.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        manager: Arc<OutboundManager>,
        options: HealthCheckOptions,
        global_history: Option<Arc<HistoryStorage>>,
    ) -> Arc<Self> {
        let destination = if options.destination.is_empty() {
            DEFAULT_DESTINATION.to_string()
        } else {
            options.destination
        };
        let interval = options.interval.unwrap_or(DEFAULT_INTERVAL).max(MIN_INTERVAL);
        let sampling = if options.sampling == 0 {
            DEFAULT_SAMPLING
        } else {
            options.sampling
        };
        let providers_by_tag = providers
            .iter()
            .map(|p| (p.tag().to_string(), p.clone()))
            .collect();
        Arc::new(HealthCheck {
            storages: Arc::new(Storages::new(sampling, interval * (sampling as u32 + 1))),
            global_history,
            providers,
            providers_by_tag,
            manager,
            destination,
            interval,
            sampling,
            detour_tags: options.detour_of,
            detour_of: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
        })
    }

    pub fn storages(&self) -> &Arc<Storages> {
        &self.storages
    }

    pub fn sampling(&self) -> usize {
        self.sampling
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts the probe and cleanup loops. Idempotent.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return Ok(());
        }
        if !self.detour_tags.is_empty() {
            let mut detour_of = Vec::with_capacity(self.detour_tags.len());
            for tag in &self.detour_tags {
                let outbound = self
                    .manager
                    .outbound(tag)
                    .ok_or_else(|| Error::Config(format!("detour_of: outbound not found: {}", tag)))?;
                detour_of.push(outbound);
            }
            *self.detour_of.lock() = detour_of;
        }
        let token = CancellationToken::new();
        *cancel = Some(token.clone());
        drop(cancel);

        let this = self.clone();
        tokio::spawn(async move {
            // wait for all providers to be ready
            for provider in &this.providers {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = provider.wait() => {}
                }
            }
            tokio::spawn(this.clone().check_loop(token.clone()));
            tokio::spawn(this.clone().cleanup_loop(token));
        });
        Ok(())
    }

    /// Cancels both loops. Idempotent.
    pub fn close(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    /// Schedules a full round in the background, e.g. after the host
    /// changed network interfaces.
    pub fn interface_updated(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.check_all().await {
                log::debug!("[healthcheck] interface-updated round: {}", err);
            }
        });
    }

    async fn check_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.check_all().await {
                            log::debug!("[healthcheck] round failed: {}", err);
                        }
                    });
                }
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // the immediate first tick has nothing to clean
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => self.cleanup(),
            }
        }
    }

    fn cleanup(&self) {
        for tag in self.storages.list() {
            if self.outbound(&tag).is_none() {
                self.storages.delete(&tag);
            }
        }
    }

    /// One probe round across every provider.
    pub async fn check_all(&self) -> Result<HashMap<String, Rtt>> {
        let mut batch = Batch::new(CHECK_CONCURRENCY);
        // share network state between the round's checks
        let meta = Arc::new(MetaData::new());
        for provider in &self.providers {
            self.check_provider_batch(&meta, &mut batch, provider);
        }
        Ok(self.wait_process_result(batch, &meta).await)
    }

    /// One probe round over a single named provider.
    pub async fn check_provider(&self, tag: &str) -> Result<HashMap<String, Rtt>> {
        let provider = self
            .providers_by_tag
            .get(tag)
            .ok_or_else(|| Error::ProviderNotFound(tag.to_string()))?
            .clone();
        let mut batch = Batch::new(CHECK_CONCURRENCY);
        let meta = Arc::new(MetaData::new());
        self.check_provider_batch(&meta, &mut batch, &provider);
        Ok(self.wait_process_result(batch, &meta).await)
    }

    /// Probes a single outbound by tag and records the result.
    pub async fn check_outbound(&self, tag: &str) -> Result<Rtt> {
        let outbound = self
            .outbound(tag)
            .ok_or_else(|| Error::OutboundNotFound(tag.to_string()))?;
        let real = real_outbound(outbound)?;
        let result = self.probe(&real).await;
        let value = *result.as_ref().unwrap_or(&Rtt::FAILED);
        if let Some(history) = &self.global_history {
            history.store(
                tag,
                History {
                    time: SystemTime::now(),
                    delay: value,
                },
            );
        }
        self.storages.put(tag, value);
        result
    }

    /// Appends a failure for the outbound, unless the latest entry is
    /// already a failure. Dialer-side errors must not flood the window or
    /// they would distort the fail-rate threshold.
    pub fn report_failure(&self, outbound: &dyn Outbound) {
        if outbound.as_group().is_some() {
            return;
        }
        let tag = outbound.tag();
        match self.storages.latest(tag) {
            Some(history) if history.delay.is_failed() => {}
            _ => self.storages.put(tag, Rtt::FAILED),
        }
    }

    fn check_provider_batch(
        &self,
        meta: &Arc<MetaData>,
        batch: &mut Batch<Rtt>,
        provider: &Arc<dyn Provider>,
    ) {
        for outbound in provider.outbounds() {
            self.check_outbound_batch(meta, batch, outbound);
        }
    }

    /// Assigns a probe task to the batch for the outbound.
    fn check_outbound_batch(
        &self,
        meta: &Arc<MetaData>,
        batch: &mut Batch<Rtt>,
        outbound: Arc<dyn Outbound>,
    ) {
        let real = match real_outbound(outbound) {
            Ok(real) => real,
            Err(err) => {
                log::debug!("[healthcheck] skipping unresolvable group member: {}", err);
                return;
            }
        };
        let tag = real.tag().to_string();
        if !meta.report_checked(&tag) {
            return;
        }
        let meta = meta.clone();
        let destination = self.destination.clone();
        let detour_of = self.detour_of.lock().clone();
        let token = self.cancel.lock().clone();
        batch.go(tag, async move {
            match probe_outbound(&destination, &detour_of, token, &real).await {
                Ok(rtt) => {
                    meta.report_success();
                    Ok(rtt)
                }
                // absorb probe errors so the whole batch completes
                Err(Error::Canceled) => Err(Error::Canceled),
                Err(_) => Ok(Rtt::FAILED),
            }
        });
    }

    async fn probe(&self, outbound: &Arc<dyn Outbound>) -> Result<Rtt> {
        let detour_of = self.detour_of.lock().clone();
        let token = self.cancel.lock().clone();
        probe_outbound(&self.destination, &detour_of, token, outbound).await
    }

    async fn wait_process_result(
        &self,
        batch: Batch<Rtt>,
        meta: &Arc<MetaData>,
    ) -> HashMap<String, Rtt> {
        let results = batch.wait_and_get_result().await;
        let mut round = HashMap::new();
        for (tag, result) in results {
            let value = match result {
                Ok(value) => value,
                // canceled probes mutate nothing
                Err(_) => continue,
            };
            // always update the global history for display usage, so the
            // latest failure status stays visible
            if let Some(history) = &self.global_history {
                history.store(
                    &tag,
                    History {
                        time: SystemTime::now(),
                        delay: value,
                    },
                );
            }
            // ignore an all-failed round, it doesn't help telling which
            // nodes are better
            if meta.any_success() {
                self.storages.put(&tag, value);
            }
            round.insert(tag, value);
        }
        round
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.providers.iter().find_map(|p| p.outbound(tag))
    }
}

/// Probes one concrete outbound, tunneling through `detour_of` when set.
async fn probe_outbound(
    destination: &str,
    detour_of: &[Arc<dyn Outbound>],
    token: Option<CancellationToken>,
    outbound: &Arc<dyn Outbound>,
) -> Result<Rtt> {
    let tag = outbound.tag().to_string();
    let mut cx = DialContext::new().with_timeout(TCP_TIMEOUT).with_quiet();
    if let Some(token) = token {
        cx = cx.with_cancellation(token);
    }
    let dialer = if detour_of.is_empty() {
        as_dialer(outbound.clone())
    } else {
        let mut chain = detour_of.to_vec();
        chain.push(outbound.clone());
        cx = cx.with_chain_redirects(chain);
        as_dialer(detour_of[0].clone())
    };
    match url_test(&cx, destination, &dialer).await {
        Ok(rtt) => {
            log::debug!("[healthcheck] outbound {} available: {}", tag, rtt);
            Ok(rtt)
        }
        Err(err) => {
            log::debug!("[healthcheck] outbound {} unavailable: {}", tag, err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::BlockOutbound;
    use crate::provider::MemoryProvider;

    fn block_provider(tags: &[&str]) -> Arc<dyn Provider> {
        let outbounds = tags
            .iter()
            .map(|tag| Arc::new(BlockOutbound::new(*tag)) as Arc<dyn Outbound>)
            .collect();
        Arc::new(MemoryProvider::new("test", outbounds))
    }

    #[test]
    fn test_defaults() {
        let checker = HealthCheck::new(
            Vec::new(),
            Arc::new(OutboundManager::new()),
            HealthCheckOptions::default(),
            None,
        );
        assert_eq!(checker.destination, DEFAULT_DESTINATION);
        assert_eq!(checker.interval, DEFAULT_INTERVAL);
        assert_eq!(checker.sampling, DEFAULT_SAMPLING);
    }

    #[test]
    fn test_interval_floor() {
        let checker = HealthCheck::new(
            Vec::new(),
            Arc::new(OutboundManager::new()),
            HealthCheckOptions {
                interval: Some(Duration::from_secs(1)),
                ..Default::default()
            },
            None,
        );
        assert_eq!(checker.interval, MIN_INTERVAL);
    }

    #[test]
    fn test_report_failure_deduplicates() {
        let provider = block_provider(&["a"]);
        let checker = HealthCheck::new(
            vec![provider.clone()],
            Arc::new(OutboundManager::new()),
            HealthCheckOptions::default(),
            None,
        );
        let outbound = provider.outbound("a").unwrap();
        checker.report_failure(outbound.as_ref());
        checker.report_failure(outbound.as_ref());
        assert_eq!(checker.storages().all("a").len(), 1);

        // a direct put always records
        checker.storages().put("a", Rtt::FAILED);
        assert_eq!(checker.storages().all("a").len(), 2);

        // after a success, a failure is recorded again
        checker.storages().put("a", Rtt(30));
        checker.report_failure(outbound.as_ref());
        assert_eq!(checker.storages().all("a").len(), 4);
    }

    #[test]
    fn test_cleanup_drops_orphan_storages() {
        let provider = block_provider(&["alive"]);
        let checker = HealthCheck::new(
            vec![provider],
            Arc::new(OutboundManager::new()),
            HealthCheckOptions::default(),
            None,
        );
        checker.storages().put("alive", Rtt(10));
        checker.storages().put("gone", Rtt(10));
        checker.cleanup();
        let mut tags = checker.storages().list();
        tags.sort();
        assert_eq!(tags, vec!["alive".to_string()]);
    }

    #[tokio::test]
    async fn test_check_provider_unknown_tag() {
        let checker = HealthCheck::new(
            Vec::new(),
            Arc::new(OutboundManager::new()),
            HealthCheckOptions::default(),
            None,
        );
        let err = checker.check_provider("nope").await.unwrap_err();
        assert!(matches!(err, Error::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn test_all_failed_round_records_nothing() {
        let provider = block_provider(&["a", "b"]);
        let checker = HealthCheck::new(
            vec![provider],
            Arc::new(OutboundManager::new()),
            HealthCheckOptions {
                destination: "http://127.0.0.1:1/unreachable".to_string(),
                ..Default::default()
            },
            Some(Arc::new(HistoryStorage::new())),
        );
        let round = checker.check_all().await.unwrap();
        assert_eq!(round.len(), 2);
        assert!(round.values().all(|rtt| rtt.is_failed()));
        // network looks down: storages untouched, global history updated
        assert!(checker.storages().list().is_empty());
        assert!(checker
            .global_history
            .as_ref()
            .unwrap()
            .load("a")
            .is_some());
    }

    #[test]
    fn test_start_requires_detour_outbounds() {
        let manager = Arc::new(OutboundManager::new());
        let checker = HealthCheck::new(
            Vec::new(),
            manager,
            HealthCheckOptions {
                detour_of: vec!["ghost".to_string()],
                ..Default::default()
            },
            None,
        );
        // no runtime needed: the detour lookup fails before any task spawns
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let _guard = rt.enter();
        assert!(checker.start().is_err());
    }
}
