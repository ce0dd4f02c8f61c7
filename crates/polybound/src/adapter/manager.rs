// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound registry.
//!
//! The manager owns the daemon-wide set of outbounds, keyed by tag, and the
//! factory table that turns parsed [`OutboundSpec`]s into live outbounds.
//! Remote providers create and remove their endpoints through it;
//! group outbounds resolve member tags against it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::{Dialer, Outbound};
use crate::{Error, Result};

/// A parsed, not-yet-constructed outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSpec {
    pub tag: String,
    pub kind: String,
    pub options: serde_json::Value,
}

/// Inputs handed to an outbound factory.
pub struct FactoryParams {
    pub tag: String,
    pub options: serde_json::Value,
    /// When set, the created outbound must tunnel through this dialer
    /// instead of its configured detour. Used by chain duplication.
    pub detour_override: Option<Arc<dyn Dialer>>,
}

pub type OutboundFactory =
    Arc<dyn Fn(FactoryParams) -> Result<Arc<dyn Outbound>> + Send + Sync>;

#[derive(Default)]
struct ManagerState {
    order: Vec<String>,
    by_tag: HashMap<String, Arc<dyn Outbound>>,
    specs: HashMap<String, OutboundSpec>,
    default_tag: Option<String>,
    factories: HashMap<String, OutboundFactory>,
}

/// Daemon-wide outbound registry.
#[derive(Default)]
pub struct OutboundManager {
    state: Mutex<ManagerState>,
}

impl OutboundManager {
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    /// Registers a factory for an outbound kind. Later registrations win.
    pub fn register_factory(&self, kind: impl Into<String>, factory: OutboundFactory) {
        self.state.lock().factories.insert(kind.into(), factory);
    }

    /// Creates an outbound from a spec and registers it under `tag`.
    pub fn create(&self, tag: &str, kind: &str, options: serde_json::Value) -> Result<()> {
        let factory = {
            let state = self.state.lock();
            state
                .factories
                .get(kind)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown outbound kind: {}", kind)))?
        };
        // Construction may be arbitrarily heavy; run it outside the lock.
        let outbound = factory(FactoryParams {
            tag: tag.to_string(),
            options: options.clone(),
            detour_override: None,
        })?;
        let mut state = self.state.lock();
        if !state.by_tag.contains_key(tag) {
            state.order.push(tag.to_string());
        }
        state.by_tag.insert(tag.to_string(), outbound);
        state.specs.insert(
            tag.to_string(),
            OutboundSpec {
                tag: tag.to_string(),
                kind: kind.to_string(),
                options,
            },
        );
        Ok(())
    }

    /// Registers an externally constructed outbound (groups, built-ins).
    pub fn insert(&self, outbound: Arc<dyn Outbound>) {
        let mut state = self.state.lock();
        let tag = outbound.tag().to_string();
        if !state.by_tag.contains_key(&tag) {
            state.order.push(tag.clone());
        }
        state.by_tag.insert(tag, outbound);
    }

    /// Duplicates the outbound registered under `tag` with its detour
    /// overridden. The duplicate is not registered; the caller owns it.
    pub fn dup_override_detour(
        &self,
        tag: &str,
        detour: Arc<dyn Dialer>,
    ) -> Result<Arc<dyn Outbound>> {
        let (factory, spec) = {
            let state = self.state.lock();
            let spec = state
                .specs
                .get(tag)
                .cloned()
                .ok_or_else(|| Error::OutboundNotFound(tag.to_string()))?;
            let factory = state
                .factories
                .get(&spec.kind)
                .cloned()
                .ok_or_else(|| Error::Config(format!("unknown outbound kind: {}", spec.kind)))?;
            (factory, spec)
        };
        factory(FactoryParams {
            tag: spec.tag,
            options: spec.options,
            detour_override: Some(detour),
        })
    }

    pub fn remove(&self, tag: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.by_tag.remove(tag).is_none() {
            return Err(Error::OutboundNotFound(tag.to_string()));
        }
        state.specs.remove(tag);
        state.order.retain(|t| t != tag);
        if state.default_tag.as_deref() == Some(tag) {
            state.default_tag = None;
        }
        Ok(())
    }

    pub fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.state.lock().by_tag.get(tag).cloned()
    }

    /// All registered outbounds in registration order.
    pub fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|tag| state.by_tag.get(tag).cloned())
            .collect()
    }

    pub fn set_default(&self, tag: impl Into<String>) {
        self.state.lock().default_tag = Some(tag.into());
    }

    /// The default outbound: the configured one, else the first registered.
    pub fn default(&self) -> Option<Arc<dyn Outbound>> {
        let state = self.state.lock();
        if let Some(tag) = &state.default_tag {
            if let Some(outbound) = state.by_tag.get(tag) {
                return Some(outbound.clone());
            }
        }
        state.order.first().and_then(|tag| state.by_tag.get(tag).cloned())
    }
}

/// Daemon-wide provider registry.
#[derive(Default)]
pub struct ProviderManager {
    providers: Mutex<Vec<Arc<dyn crate::adapter::Provider>>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        ProviderManager::default()
    }

    pub fn insert(&self, provider: Arc<dyn crate::adapter::Provider>) {
        self.providers.lock().push(provider);
    }

    pub fn provider(&self, tag: &str) -> Option<Arc<dyn crate::adapter::Provider>> {
        self.providers.lock().iter().find(|p| p.tag() == tag).cloned()
    }

    pub fn providers(&self) -> Vec<Arc<dyn crate::adapter::Provider>> {
        self.providers.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{register_builtins, BlockOutbound};

    #[test]
    fn test_create_and_lookup() {
        let manager = OutboundManager::new();
        register_builtins(&manager);
        manager
            .create("a", "block", serde_json::json!({}))
            .unwrap();
        assert!(manager.outbound("a").is_some());
        assert_eq!(manager.outbounds().len(), 1);
        assert_eq!(manager.outbound("a").unwrap().kind(), "block");
    }

    #[test]
    fn test_unknown_kind() {
        let manager = OutboundManager::new();
        let err = manager
            .create("a", "warpdrive", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_remove() {
        let manager = OutboundManager::new();
        manager.insert(Arc::new(BlockOutbound::new("a")));
        manager.remove("a").unwrap();
        assert!(manager.outbound("a").is_none());
        assert!(manager.remove("a").is_err());
    }

    #[test]
    fn test_default_prefers_configured_tag() {
        let manager = OutboundManager::new();
        manager.insert(Arc::new(BlockOutbound::new("first")));
        manager.insert(Arc::new(BlockOutbound::new("second")));
        assert_eq!(manager.default().unwrap().tag(), "first");
        manager.set_default("second");
        assert_eq!(manager.default().unwrap().tag(), "second");
    }

    #[test]
    fn test_dup_requires_spec() {
        let manager = OutboundManager::new();
        manager.insert(Arc::new(BlockOutbound::new("a")));
        // Inserted outbounds carry no spec, so they cannot be duplicated.
        let detour: Arc<dyn Dialer> = Arc::new(BlockOutbound::new("d"));
        assert!(manager.dup_override_detour("a", detour).is_err());
    }
}
