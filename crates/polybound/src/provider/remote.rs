// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote subscription provider.
//!
//! Fetches a subscription URL on a schedule, parses the links into
//! outbounds through the registry, and reconciles its owned set. A cache
//! file carries the fleet across cold starts when the network is not up
//! yet; once a live set is loaded, fetch failures no longer fall back to
//! the cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::cache::{load_cache, save_cache_if_need};
use super::content::{parse_file_content, FileContent};
use super::info::ProviderInfo;
use crate::adapter::{as_dialer, Dialer, Outbound, OutboundManager, Provider};
use crate::dialer::DialContext;
use crate::link;
use crate::outbound::SystemDialer;
use crate::transport::HttpClient;
use crate::{Error, Result};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MIN_INTERVAL: Duration = Duration::from_secs(60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "ProxySubscriber/0.6.0  Shadowrocket/2070";

/// Remote provider settings.
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    pub url: String,
    /// Refresh period; default 1 hour, floor 1 minute.
    pub interval: Option<Duration>,
    pub cache_file: Option<PathBuf>,
    /// Outbound used as the HTTP dialer; default: the registry default.
    pub download_detour: Option<String>,
    /// Drop endpoints whose tag matches.
    pub exclude: Option<String>,
    /// Keep only endpoints whose tag matches. Exclude wins.
    pub include: Option<String>,
    pub disable_user_agent: bool,
}

#[derive(Default)]
struct RemoteState {
    detour: Option<Arc<dyn Outbound>>,
    loaded_hash: String,
    updated_at: Option<SystemTime>,
    info: Option<ProviderInfo>,
    outbounds: Vec<Arc<dyn Outbound>>,
    by_tag: HashMap<String, Arc<dyn Outbound>>,
}

/// A remote outbounds provider.
pub struct RemoteProvider {
    tag: String,
    url: String,
    interval: Duration,
    cache_file: Option<PathBuf>,
    download_detour: Option<String>,
    exclude: Option<Regex>,
    include: Option<Regex>,
    user_agent: Option<String>,
    manager: Arc<OutboundManager>,

    state: Mutex<RemoteState>,
    // serializes update() across its await points
    update_lock: tokio::sync::Mutex<()>,
    ready_tx: watch::Sender<bool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProvider").field("tag", &self.tag).finish()
    }
}

impl RemoteProvider {
    pub fn new(
        manager: Arc<OutboundManager>,
        tag: impl Into<String>,
        options: RemoteOptions,
    ) -> Result<Arc<Self>> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(Error::Config("provider tag is required".to_string()));
        }
        if options.url.is_empty() {
            return Err(Error::Config("provider URL is required".to_string()));
        }
        let exclude = options.exclude.as_deref().map(Regex::new).transpose()?;
        let include = options.include.as_deref().map(Regex::new).transpose()?;
        let interval = options
            .interval
            .unwrap_or(DEFAULT_INTERVAL)
            .max(MIN_INTERVAL);
        let (ready_tx, _) = watch::channel(false);
        Ok(Arc::new(RemoteProvider {
            tag,
            url: options.url,
            interval,
            cache_file: options.cache_file,
            download_detour: options.download_detour,
            exclude,
            include,
            user_agent: (!options.disable_user_agent).then(|| USER_AGENT.to_string()),
            manager,
            state: Mutex::new(RemoteState::default()),
            update_lock: tokio::sync::Mutex::new(()),
            ready_tx,
            cancel: Mutex::new(None),
        }))
    }

    /// Resolves the download detour and spawns the refresh loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return Ok(());
        }
        let detour = match &self.download_detour {
            Some(tag) => Some(
                self.manager
                    .outbound(tag)
                    .ok_or_else(|| Error::Config(format!("detour outbound not found: {}", tag)))?,
            ),
            None => self.manager.default(),
        };
        self.state.lock().detour = detour;
        let token = CancellationToken::new();
        *cancel = Some(token.clone());
        drop(cancel);

        let this = self.clone();
        tokio::spawn(async move { this.refresh_loop(token).await });
        Ok(())
    }

    async fn refresh_loop(self: Arc<Self>, token: CancellationToken) {
        if let Err(err) = self.update().await {
            log::error!("[provider/remote[{}]] {}", self.tag, err);
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.update().await {
                        log::error!("[provider/remote[{}]] {}", self.tag, err);
                    }
                }
            }
        }
    }

    async fn update_locked(&self) -> Result<()> {
        let content = self.download_with_cache().await?;
        {
            let mut state = self.state.lock();
            state.updated_at = Some(content.updated);
            state.info = content.info;
            if state.loaded_hash == content.links_hash {
                return Ok(());
            }
            state.loaded_hash = content.links_hash.clone();
        }
        self.reconcile(&content.links);
        Ok(())
    }

    fn reconcile(&self, links_text: &str) {
        let mut specs = Vec::new();
        for (index, line) in links_text.split('\n').enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let url = match url::Url::parse(line) {
                Ok(url) => url,
                Err(err) => {
                    log::warn!(
                        "[provider/remote[{}]] line {}: not a url: {}",
                        self.tag,
                        index,
                        err
                    );
                    continue;
                }
            };
            let parsed = match link::parse(&url) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!("[provider/remote[{}]] line {}: {}", self.tag, index, err);
                    continue;
                }
            };
            let mut spec = match parsed.outbound() {
                Ok(spec) => spec,
                Err(err) => {
                    log::warn!("[provider/remote[{}]] line {}: {}", self.tag, index, err);
                    continue;
                }
            };
            spec.tag = format!("{}/{}", self.tag, spec.tag);
            if let Some(exclude) = &self.exclude {
                if exclude.is_match(&spec.tag) {
                    continue;
                }
            }
            if let Some(include) = &self.include {
                if !include.is_match(&spec.tag) {
                    continue;
                }
            }
            specs.push(spec);
        }
        log::info!("[provider/remote[{}]] {} links found", self.tag, specs.len());

        let mut outbounds = Vec::with_capacity(specs.len());
        let mut by_tag = HashMap::new();
        for spec in specs {
            if let Err(err) = self.manager.create(&spec.tag, &spec.kind, spec.options) {
                log::warn!("[provider/remote[{}]] create [{}]: {}", self.tag, spec.tag, err);
                continue;
            }
            let outbound = match self.manager.outbound(&spec.tag) {
                Some(outbound) => outbound,
                None => {
                    log::warn!(
                        "[provider/remote[{}]] outbound [{}] not found",
                        self.tag,
                        spec.tag
                    );
                    continue;
                }
            };
            by_tag.insert(spec.tag, outbound.clone());
            outbounds.push(outbound);
        }

        let previous = {
            let mut state = self.state.lock();
            let previous = std::mem::take(&mut state.by_tag);
            state.outbounds = outbounds;
            state.by_tag = by_tag.clone();
            previous
        };
        for tag in previous.keys() {
            if !by_tag.contains_key(tag) {
                if let Err(err) = self.manager.remove(tag) {
                    log::error!("[provider/remote[{}]] close outbound [{}]: {}", self.tag, tag, err);
                }
            }
        }
    }

    async fn download_with_cache(&self) -> Result<FileContent> {
        let fetch_err = match self.download().await {
            Ok(content) => {
                if let Some(path) = &self.cache_file {
                    if let Err(err) = save_cache_if_need(path, &content) {
                        log::error!("[provider/remote[{}]] save cache file: {}", self.tag, err);
                    }
                }
                return Ok(content);
            }
            Err(err) => err,
        };
        if !self.state.lock().loaded_hash.is_empty() {
            // a live set exists; surface the fetch failure
            return Err(fetch_err);
        }
        let path = match &self.cache_file {
            Some(path) => path,
            None => return Err(fetch_err),
        };
        match load_cache(path) {
            Ok(content) => {
                log::info!(
                    "[provider/remote[{}]] cache file loaded due to: {}",
                    self.tag,
                    fetch_err
                );
                Ok(content)
            }
            Err(load_err) => {
                log::error!("[provider/remote[{}]] load cache file: {}", self.tag, load_err);
                Err(load_err)
            }
        }
    }

    async fn download(&self) -> Result<FileContent> {
        let detour = self.state.lock().detour.clone();
        let dialer: Arc<dyn Dialer> = match detour {
            Some(outbound) => as_dialer(outbound),
            None => Arc::new(SystemDialer),
        };
        let mut client = HttpClient::new(dialer);
        if let Some(user_agent) = &self.user_agent {
            client = client.with_user_agent(user_agent);
        }
        let mut cx = DialContext::new().with_timeout(FETCH_TIMEOUT);
        if let Some(token) = self.cancel.lock().clone() {
            cx = cx.with_cancellation(token);
        }
        let response = client.get(&cx, &self.url).await?;
        if !response.is_success() {
            return Err(Error::UnexpectedStatus(response.status));
        }
        let text = String::from_utf8_lossy(&response.body).into_owned();
        Ok(parse_file_content(&text, SystemTime::now()))
    }

    fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    fn kind(&self) -> &str {
        "http"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn updated_at(&self) -> Option<SystemTime> {
        self.state.lock().updated_at
    }

    fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.state.lock().outbounds.clone()
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.state.lock().by_tag.get(tag).cloned()
    }

    fn info(&self) -> Option<ProviderInfo> {
        self.state.lock().info
    }

    async fn wait(&self) {
        let mut ready = self.ready_tx.subscribe();
        while !*ready.borrow() {
            if ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Fetches and reconciles now. The readiness signal fires after the
    /// first attempt, success or not, so `wait()` never blocks past the
    /// first refresh.
    async fn update(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        let result = self.update_locked().await;
        self.mark_ready();
        result
    }

    async fn close(&self) -> Result<()> {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        let outbounds = {
            let mut state = self.state.lock();
            let outbounds = std::mem::take(&mut state.outbounds);
            state.by_tag.clear();
            outbounds
        };
        let mut first_err = None;
        for outbound in outbounds {
            if let Err(err) = self.manager.remove(outbound.tag()) {
                log::error!(
                    "[provider/remote[{}]] close outbound [{}]: {}",
                    self.tag,
                    outbound.tag(),
                    err
                );
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::register_builtins;

    fn manager() -> Arc<OutboundManager> {
        let manager = Arc::new(OutboundManager::new());
        register_builtins(&manager);
        manager
    }

    #[test]
    fn test_requires_url() {
        let err = RemoteProvider::new(manager(), "sub", RemoteOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_bad_regex() {
        let options = RemoteOptions {
            url: "http://example.com/sub".to_string(),
            exclude: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            RemoteProvider::new(manager(), "sub", options),
            Err(Error::Regex(_))
        ));
    }

    #[test]
    fn test_interval_floor() {
        let options = RemoteOptions {
            url: "http://example.com/sub".to_string(),
            interval: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let provider = RemoteProvider::new(manager(), "sub", options).unwrap();
        assert_eq!(provider.interval, MIN_INTERVAL);
    }

    #[test]
    fn test_reconcile_namespaces_filters_and_removes() {
        use crate::outbound::BlockOutbound;

        let manager = manager();
        manager.register_factory(
            "socks",
            Arc::new(|params| {
                Ok(Arc::new(BlockOutbound::new(params.tag)) as Arc<dyn Outbound>)
            }),
        );
        let provider = RemoteProvider::new(
            manager.clone(),
            "sub",
            RemoteOptions {
                url: "http://example.com/sub".to_string(),
                exclude: Some("skip".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        provider.reconcile("socks5://h.example:1080#skip-me\nsocks5://h.example:1080#keep");
        assert_eq!(provider.outbounds().len(), 1);
        assert!(provider.outbound("sub/keep").is_some());
        assert!(manager.outbound("sub/keep").is_some());

        // membership churn removes dropped endpoints from the registry
        provider.reconcile("socks5://h.example:1080#fresh");
        assert!(provider.outbound("sub/keep").is_none());
        assert!(manager.outbound("sub/keep").is_none());
        assert!(manager.outbound("sub/fresh").is_some());
    }

    #[test]
    fn test_unknown_kind_lines_are_skipped() {
        let provider = RemoteProvider::new(
            manager(),
            "sub",
            RemoteOptions {
                url: "http://example.com/sub".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        // no factory registered for "socks": logged and skipped
        provider.reconcile("socks5://h.example:1080#keep");
        assert!(provider.outbounds().is_empty());
    }

    #[tokio::test]
    async fn test_wait_unblocks_after_failed_update() {
        let provider = RemoteProvider::new(
            manager(),
            "sub",
            RemoteOptions {
                url: "http://127.0.0.1:1/sub".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(provider.update().await.is_err());
        // readiness closed despite the failure
        provider.wait().await;
        assert!(provider.updated_at().is_none());
    }
}
