// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Group outbounds.
//!
//! A group is an outbound that delegates dialing to a chosen member:
//! [`Selector`] by explicit choice, [`UrlTest`] by latest probe delay,
//! [`LoadBalance`] through a [`crate::balancer::Balancer`], and [`Chain`]
//! through a fixed tunnel. Members come from static outbound tags, from
//! providers, or both; the shared [`GroupAdapter`] makes the two sources
//! uniform.

mod chain;
pub mod interrupt;
mod loadbalance;
mod selector;
mod urltest;

pub use chain::{Chain, ChainOptions};
pub use loadbalance::LoadBalance;
pub use selector::{Selector, SelectorOptions};
pub use urltest::{UrlTest, UrlTestOptions};

use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;

use crate::adapter::{Outbound, OutboundManager, Provider, ProviderManager};
use crate::provider::MemoryProvider;
use crate::{Error, Result};

/// Member sources shared by all group kinds.
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    /// Static member outbound tags.
    pub outbounds: Vec<String>,
    /// Provider tags contributing members.
    pub providers: Vec<String>,
    /// Drop provider members whose tag matches.
    pub exclude: Option<String>,
    /// Keep only provider members whose tag matches. Exclude wins.
    pub include: Option<String>,
}

struct ProviderEntry {
    provider: Arc<dyn Provider>,
    /// Filters apply to subscription members, not static ones.
    filterable: bool,
}

/// Common member plumbing of group outbounds.
pub struct GroupAdapter {
    tag: String,
    options: GroupOptions,
    exclude: Option<Regex>,
    include: Option<Regex>,
    providers: Mutex<Vec<ProviderEntry>>,
}

impl GroupAdapter {
    pub fn new(tag: impl Into<String>, options: GroupOptions) -> Result<Self> {
        let exclude = options.exclude.as_deref().map(Regex::new).transpose()?;
        let include = options.include.as_deref().map(Regex::new).transpose()?;
        Ok(GroupAdapter {
            tag: tag.into(),
            options,
            exclude,
            include,
            providers: Mutex::new(Vec::new()),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Resolves static member tags and provider tags. Must run before the
    /// group serves requests.
    pub fn init_providers(
        &self,
        manager: &OutboundManager,
        providers: &ProviderManager,
    ) -> Result<()> {
        let mut entries = Vec::new();
        if !self.options.outbounds.is_empty() {
            let mut members = Vec::with_capacity(self.options.outbounds.len());
            for tag in &self.options.outbounds {
                let outbound = manager
                    .outbound(tag)
                    .ok_or_else(|| Error::OutboundNotFound(tag.clone()))?;
                members.push(outbound);
            }
            entries.push(ProviderEntry {
                provider: Arc::new(MemoryProvider::new(self.tag.clone(), members)),
                filterable: false,
            });
        }
        for tag in &self.options.providers {
            let provider = providers
                .provider(tag)
                .ok_or_else(|| Error::ProviderNotFound(tag.clone()))?;
            entries.push(ProviderEntry {
                provider,
                filterable: true,
            });
        }
        *self.providers.lock() = entries;
        Ok(())
    }

    pub fn providers(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .lock()
            .iter()
            .map(|entry| entry.provider.clone())
            .collect()
    }

    pub fn provider(&self, tag: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .lock()
            .iter()
            .map(|entry| &entry.provider)
            .find(|p| p.tag() == tag)
            .cloned()
    }

    fn keeps(&self, tag: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(tag) {
                return false;
            }
        }
        if let Some(include) = &self.include {
            if !include.is_match(tag) {
                return false;
            }
        }
        true
    }

    /// All member outbounds, static first, filters applied.
    pub fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        let providers = self.providers.lock();
        let mut members = Vec::new();
        for entry in providers.iter() {
            for outbound in entry.provider.outbounds() {
                if entry.filterable && !self.keeps(outbound.tag()) {
                    continue;
                }
                members.push(outbound);
            }
        }
        members
    }

    pub fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.outbounds().into_iter().find(|o| o.tag() == tag)
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.outbounds()
            .iter()
            .map(|o| o.tag().to_string())
            .collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::BlockOutbound;

    fn managers_with(tags: &[&str]) -> (Arc<OutboundManager>, ProviderManager) {
        let manager = Arc::new(OutboundManager::new());
        for tag in tags {
            manager.insert(Arc::new(BlockOutbound::new(*tag)));
        }
        (manager, ProviderManager::new())
    }

    #[test]
    fn test_static_members_resolve_in_order() {
        let (manager, providers) = managers_with(&["a", "b"]);
        let adapter = GroupAdapter::new(
            "g",
            GroupOptions {
                outbounds: vec!["b".to_string(), "a".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        adapter.init_providers(&manager, &providers).unwrap();
        assert_eq!(adapter.all_tags(), vec!["b".to_string(), "a".to_string()]);
        assert!(adapter.outbound("a").is_some());
    }

    #[test]
    fn test_missing_static_member_fails_init() {
        let (manager, providers) = managers_with(&["a"]);
        let adapter = GroupAdapter::new(
            "g",
            GroupOptions {
                outbounds: vec!["ghost".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            adapter.init_providers(&manager, &providers),
            Err(Error::OutboundNotFound(_))
        ));
    }

    #[test]
    fn test_provider_members_filtered() {
        let (manager, providers) = managers_with(&[]);
        providers.insert(Arc::new(MemoryProvider::new(
            "sub",
            vec![
                Arc::new(BlockOutbound::new("sub/keep")) as Arc<dyn Outbound>,
                Arc::new(BlockOutbound::new("sub/skip-this")) as Arc<dyn Outbound>,
            ],
        )));
        let adapter = GroupAdapter::new(
            "g",
            GroupOptions {
                providers: vec!["sub".to_string()],
                exclude: Some("skip".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        adapter.init_providers(&manager, &providers).unwrap();
        assert_eq!(adapter.all_tags(), vec!["sub/keep".to_string()]);
    }

    #[test]
    fn test_unknown_provider_fails_init() {
        let (manager, providers) = managers_with(&[]);
        let adapter = GroupAdapter::new(
            "g",
            GroupOptions {
                providers: vec!["ghost".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            adapter.init_providers(&manager, &providers),
            Err(Error::ProviderNotFound(_))
        ));
    }
}
