// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Chain outbound.
//!
//! Tunnels every dial through a fixed sequence of outbounds. At start the
//! intermediates are duplicated, from the tail backward, with their detour
//! overridden to point at the next stage; the originals stay untouched in
//! the registry.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::adapter::{
    as_dialer, BoxPacketConn, BoxStream, Destination, Dialer, NetworkSet, Outbound,
    OutboundManager,
};
use crate::dialer::DialContext;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    /// Stage tags, first is the entry, last is the exit.
    pub outbounds: Vec<String>,
}

/// A fixed tunnel of two or more outbounds.
pub struct Chain {
    tag: String,
    outbound_tags: Vec<String>,
    stages: Mutex<Vec<Arc<dyn Outbound>>>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("tag", &self.tag)
            .field("outbound_tags", &self.outbound_tags)
            .finish()
    }
}

impl Chain {
    pub fn new(tag: impl Into<String>, options: ChainOptions) -> Result<Self> {
        if options.outbounds.len() < 2 {
            return Err(Error::Config("chain requires 2 or more outbounds".to_string()));
        }
        Ok(Chain {
            tag: tag.into(),
            outbound_tags: options.outbounds,
            stages: Mutex::new(Vec::new()),
        })
    }

    /// Builds the private stage dialers, tail backward.
    pub fn start(&self, manager: &OutboundManager) -> Result<()> {
        let last_tag = &self.outbound_tags[self.outbound_tags.len() - 1];
        let mut detour = manager
            .outbound(last_tag)
            .ok_or_else(|| Error::OutboundNotFound(last_tag.clone()))?;
        let mut stages = vec![detour.clone()];
        for tag in self.outbound_tags[..self.outbound_tags.len() - 1].iter().rev() {
            let stage = manager
                .dup_override_detour(tag, as_dialer(detour))
                .map_err(|err| {
                    Error::Config(format!(
                        "failed to create [{}] for chain [{}]: {}",
                        tag, self.tag, err
                    ))
                })?;
            stages.insert(0, stage.clone());
            detour = stage;
        }
        *self.stages.lock() = stages;
        Ok(())
    }

    /// Releases the duplicated stages.
    pub fn close(&self) {
        self.stages.lock().clear();
    }

    fn head(&self) -> Result<Arc<dyn Outbound>> {
        self.stages
            .lock()
            .first()
            .cloned()
            .ok_or_else(|| Error::NoOutboundAvailable("chain is not started".to_string()))
    }
}

#[async_trait]
impl Dialer for Chain {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        self.head()?.dial_stream(cx, destination).await
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        self.head()?.dial_packet(cx, destination).await
    }
}

impl Outbound for Chain {
    fn kind(&self) -> &str {
        "chain"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn networks(&self) -> NetworkSet {
        NetworkSet::BOTH
    }

    fn dependencies(&self) -> Vec<String> {
        self.outbound_tags.clone()
    }
}
