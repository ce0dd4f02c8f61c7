// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Manual selector group.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use super::{interrupt, GroupAdapter, GroupOptions};
use crate::adapter::{
    BoxPacketConn, BoxStream, Destination, Dialer, NetworkSet, Outbound, OutboundGroup,
    OutboundManager, ProviderManager,
};
use crate::cachefile::CacheFile;
use crate::dialer::DialContext;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct SelectorOptions {
    pub group: GroupOptions,
    /// Member selected when nothing is persisted.
    pub default_tag: Option<String>,
    /// Whether switching also cuts connections dialed by other groups.
    pub interrupt_existing_connections: bool,
}

/// An outbound that dials through an explicitly selected member.
pub struct Selector {
    adapter: GroupAdapter,
    default_tag: Option<String>,
    // lock-free reference to the current selection
    selected: ArcSwapOption<Arc<dyn Outbound>>,
    cache_file: Option<Arc<dyn CacheFile>>,
    interrupt_group: interrupt::Group,
    interrupt_external: bool,
}

impl Selector {
    pub fn new(
        tag: impl Into<String>,
        options: SelectorOptions,
        cache_file: Option<Arc<dyn CacheFile>>,
    ) -> Result<Self> {
        Ok(Selector {
            adapter: GroupAdapter::new(tag, options.group)?,
            default_tag: options.default_tag,
            selected: ArcSwapOption::empty(),
            cache_file,
            interrupt_group: interrupt::Group::new(),
            interrupt_external: options.interrupt_existing_connections,
        })
    }

    /// Resolves members and restores the persisted or default selection.
    pub fn start(&self, manager: &OutboundManager, providers: &ProviderManager) -> Result<()> {
        self.adapter.init_providers(manager, providers)?;
        if let Some(cache) = &self.cache_file {
            if let Some(selected) = cache.load_selected(self.adapter.tag()) {
                if let Some(outbound) = self.adapter.outbound(&selected) {
                    self.selected.store(Some(Arc::new(outbound)));
                    return Ok(());
                }
            }
        }
        if let Some(default_tag) = &self.default_tag {
            let outbound = self
                .adapter
                .outbound(default_tag)
                .ok_or_else(|| Error::Config(format!("default outbound not found: {}", default_tag)))?;
            self.selected.store(Some(Arc::new(outbound)));
        }
        Ok(())
    }

    /// Switches the selection. Returns `false` for an unknown tag.
    pub fn select(&self, tag: &str) -> bool {
        let outbound = match self.adapter.outbound(tag) {
            Some(outbound) => outbound,
            None => return false,
        };
        let previous = self.selected.swap(Some(Arc::new(outbound.clone())));
        if let Some(previous) = previous {
            if Arc::ptr_eq(&*previous, &outbound) {
                // same member: nothing to interrupt or persist
                return true;
            }
        }
        if let Some(cache) = &self.cache_file {
            if let Err(err) = cache.store_selected(self.adapter.tag(), tag) {
                log::error!("[selector[{}]] store selected: {}", self.adapter.tag(), err);
            }
        }
        self.interrupt_group.interrupt(self.interrupt_external);
        true
    }

    fn ensure_selected(&self) -> Result<Arc<dyn Outbound>> {
        if let Some(selected) = self.selected.load_full() {
            return Ok((*selected).clone());
        }
        let all = self.adapter.outbounds();
        let first = all
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoOutboundAvailable("providers are not loaded yet".to_string()))?;
        self.selected.store(Some(Arc::new(first.clone())));
        Ok(first)
    }
}

#[async_trait]
impl Dialer for Selector {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        let selected = self.ensure_selected()?;
        let stream = selected.dial_stream(cx, destination).await?;
        Ok(self
            .interrupt_group
            .new_conn(stream, cx.external_connection()))
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        let selected = self.ensure_selected()?;
        let conn = selected.dial_packet(cx, destination).await?;
        Ok(self
            .interrupt_group
            .new_packet_conn(conn, cx.external_connection()))
    }
}

impl Outbound for Selector {
    fn kind(&self) -> &str {
        "selector"
    }

    fn tag(&self) -> &str {
        self.adapter.tag()
    }

    fn networks(&self) -> NetworkSet {
        match self.selected.load_full() {
            Some(selected) => selected.networks(),
            None => NetworkSet::BOTH,
        }
    }

    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        Some(self)
    }
}

impl OutboundGroup for Selector {
    fn now(&self) -> String {
        match self.selected.load_full() {
            Some(selected) => selected.tag().to_string(),
            None => String::new(),
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
    use crate::cachefile::MemoryCacheFile;
    use crate::outbound::BlockOutbound;

    fn setup(tags: &[&str]) -> (Arc<OutboundManager>, ProviderManager) {
        let manager = Arc::new(OutboundManager::new());
        for tag in tags {
            manager.insert(Arc::new(BlockOutbound::new(*tag)));
        }
        (manager, ProviderManager::new())
    }

    fn options(tags: &[&str]) -> SelectorOptions {
        SelectorOptions {
            group: GroupOptions {
                outbounds: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_persisted_selection_wins_over_default() {
        let (manager, providers) = setup(&["a", "b"]);
        let cache = Arc::new(MemoryCacheFile::new());
        cache.store_selected("g", "b").unwrap();
        let selector = Selector::new(
            "g",
            SelectorOptions {
                default_tag: Some("a".to_string()),
                ..options(&["a", "b"])
            },
            Some(cache),
        )
        .unwrap();
        selector.start(&manager, &providers).unwrap();
        assert_eq!(selector.now(), "b");
    }

    #[test]
    fn test_default_selection() {
        let (manager, providers) = setup(&["a", "b"]);
        let selector = Selector::new(
            "g",
            SelectorOptions {
                default_tag: Some("b".to_string()),
                ..options(&["a", "b"])
            },
            None,
        )
        .unwrap();
        selector.start(&manager, &providers).unwrap();
        assert_eq!(selector.now(), "b");
    }

    #[test]
    fn test_missing_default_fails_start() {
        let (manager, providers) = setup(&["a"]);
        let selector = Selector::new(
            "g",
            SelectorOptions {
                default_tag: Some("ghost".to_string()),
                ..options(&["a"])
            },
            None,
        )
        .unwrap();
        assert!(selector.start(&manager, &providers).is_err());
    }

    #[test]
    fn test_select_persists() {
        let (manager, providers) = setup(&["a", "b"]);
        let cache = Arc::new(MemoryCacheFile::new());
        let selector = Selector::new("g", options(&["a", "b"]), Some(cache.clone())).unwrap();
        selector.start(&manager, &providers).unwrap();
        assert!(selector.select("b"));
        assert_eq!(selector.now(), "b");
        assert_eq!(cache.load_selected("g").unwrap(), "b");
        assert!(!selector.select("ghost"));
    }

    #[tokio::test]
    async fn test_first_available_fallback_on_dial() {
        let (manager, providers) = setup(&["a", "b"]);
        let selector = Selector::new("g", options(&["a", "b"]), None).unwrap();
        selector.start(&manager, &providers).unwrap();
        assert_eq!(selector.now(), "");
        // dialing forces a selection; block members fail the dial itself
        let err = selector
            .dial_stream(&DialContext::new(), &Destination::new("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(selector.now(), "a");
    }

    #[tokio::test]
    async fn test_no_members_reports_not_loaded() {
        let (manager, providers) = setup(&[]);
        let selector = Selector::new("g", options(&[]), None).unwrap();
        selector.start(&manager, &providers).unwrap();
        let err = selector
            .dial_stream(&DialContext::new(), &Destination::new("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoOutboundAvailable(_)));
    }
}
