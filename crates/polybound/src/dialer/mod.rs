// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dial context plumbing.
//!
//! A [`DialContext`] travels with every dial call and carries the per-call
//! timeout, a cancellation token, a quiet-logging marker for probes, and an
//! optional chain-redirect record that instructs cooperating dialers to
//! tunnel through a fixed sequence of outbounds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::{BoxPacketConn, BoxStream, Destination, Dialer, Outbound};
use crate::{Error, Result};

/// Per-call dialing context.
#[derive(Clone, Default)]
pub struct DialContext {
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    chain: Option<Arc<ChainRedirect>>,
    quiet: bool,
    external: bool,
}

impl DialContext {
    pub fn new() -> Self {
        DialContext::default()
    }

    /// Per-call timeout for the whole dial (and, for probes, the request).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Marks this dial as a probe; failures are logged at debug level only.
    pub fn with_quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Attaches a chain-redirect record: cooperating dialers encountered in
    /// `chain` order will each hand the connection to the next element.
    pub fn with_chain_redirects(mut self, chain: Vec<Arc<dyn Outbound>>) -> Self {
        self.chain = Some(Arc::new(ChainRedirect {
            chain,
            current: Mutex::new(0),
        }));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Marks the dial as coming from another group, so a selector switch
    /// only interrupts it when external interruption is configured.
    pub fn with_external_connection(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn external_connection(&self) -> bool {
        self.external
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false)
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    pub(crate) fn chain(&self) -> Option<&Arc<ChainRedirect>> {
        self.chain.as_ref()
    }
}

/// Where a chain redirect sends the next hop.
pub(crate) enum ChainHop {
    /// Tunnel through this outbound next.
    Next(Arc<dyn Outbound>),
    /// This dialer is the last element; connect with its own transport.
    Last,
}

/// Shared walk state over a fixed outbound chain.
pub(crate) struct ChainRedirect {
    chain: Vec<Arc<dyn Outbound>>,
    current: Mutex<usize>,
}

impl ChainRedirect {
    /// Advances the walk if `tag` matches the current chain element.
    fn advance(&self, tag: &str) -> Option<ChainHop> {
        let mut current = self.current.lock();
        if *current >= self.chain.len() || self.chain[*current].tag() != tag {
            return None;
        }
        *current += 1;
        if *current == self.chain.len() {
            Some(ChainHop::Last)
        } else {
            Some(ChainHop::Next(self.chain[*current].clone()))
        }
    }
}

/// A dialer that can be redirected to form a chain with others.
///
/// Outbound implementations embed this as their transport seam: when a dial
/// context carries a chain-redirect record whose current element names this
/// dialer's parent outbound, the connection is handed to the next chain
/// element instead of the configured detour.
pub struct ChainRedirectDialer {
    /// Tag of the parent outbound of this dialer.
    tag: String,
    /// Whether this dialer may be redirected at all.
    detourable: bool,
    /// Dialer used when no redirect applies (configured detour or the
    /// fallback transport).
    detour: Arc<dyn Dialer>,
    /// Transport used when this dialer is the last element of a chain,
    /// no matter what the detour is.
    fallback: Arc<dyn Dialer>,
}

impl ChainRedirectDialer {
    pub fn new(
        tag: impl Into<String>,
        detourable: bool,
        detour: Arc<dyn Dialer>,
        fallback: Arc<dyn Dialer>,
    ) -> Self {
        ChainRedirectDialer {
            tag: tag.into(),
            detourable,
            detour,
            fallback,
        }
    }

    fn hop_from_context(&self, cx: &DialContext) -> Option<ChainHop> {
        if self.tag.is_empty() {
            return None;
        }
        cx.chain()?.advance(&self.tag)
    }
}

#[async_trait]
impl Dialer for ChainRedirectDialer {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        match self.hop_from_context(cx) {
            Some(_) if !self.detourable => Err(Error::Config(format!(
                "[{}] detour redirect is not supported",
                self.tag
            ))),
            Some(ChainHop::Next(outbound)) => outbound.dial_stream(cx, destination).await,
            Some(ChainHop::Last) => self.fallback.dial_stream(cx, destination).await,
            None => self.detour.dial_stream(cx, destination).await,
        }
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        match self.hop_from_context(cx) {
            Some(_) if !self.detourable => Err(Error::Config(format!(
                "[{}] detour redirect is not supported",
                self.tag
            ))),
            Some(ChainHop::Next(outbound)) => outbound.dial_packet(cx, destination).await,
            Some(ChainHop::Last) => self.fallback.dial_packet(cx, destination).await,
            None => self.detour.dial_packet(cx, destination).await,
        }
    }
}
