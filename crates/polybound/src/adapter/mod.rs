// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core traits of the engine.
//!
//! An [`Outbound`] is a dialable proxy target with a string tag and a
//! network capability set. A [`Provider`] is a managed collection of
//! outbounds with a refresh contract and a readiness signal. Group
//! outbounds additionally implement [`OutboundGroup`] and delegate their
//! dialing to a chosen member.
//!
//! Ownership: outbounds are `Arc`-shared values. The provider (or the
//! [`manager::OutboundManager`]) that created an outbound is the party that
//! removes it; long-running connections hold their own references and are
//! not interrupted by removal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dialer::DialContext;
use crate::provider::ProviderInfo;
use crate::{Error, Result};

pub mod manager;

pub use manager::{FactoryParams, OutboundManager, OutboundSpec, ProviderManager};

/// Upper bound for group-in-group resolution; exceeding it signals a cycle
/// or an unreasonably deep chain.
pub const MAX_GROUP_NESTING: usize = 100;

/// A transport network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Tcp => f.write_str("tcp"),
            Network::Udp => f.write_str("udp"),
        }
    }
}

/// The set of networks an outbound can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSet {
    pub tcp: bool,
    pub udp: bool,
}

impl NetworkSet {
    pub const BOTH: NetworkSet = NetworkSet { tcp: true, udp: true };
    pub const TCP: NetworkSet = NetworkSet { tcp: true, udp: false };
    pub const UDP: NetworkSet = NetworkSet { tcp: false, udp: true };

    pub fn contains(self, network: Network) -> bool {
        match network {
            Network::Tcp => self.tcp,
            Network::Udp => self.udp,
        }
    }

    pub fn is_empty(self) -> bool {
        !self.tcp && !self.udp
    }
}

/// A dial target, host name or literal address plus port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Destination { host: host.into(), port }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Byte stream produced by a dialer.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

impl std::fmt::Debug for dyn AsyncStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncStream")
    }
}

pub type BoxStream = Box<dyn AsyncStream>;

/// Datagram socket produced by a dialer.
#[async_trait]
pub trait PacketConn: Send + Sync {
    async fn send_to(&self, buf: &[u8], destination: &Destination) -> Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
}

pub type BoxPacketConn = Box<dyn PacketConn>;

/// The dial capability every outbound provides.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream>;
    async fn dial_packet(&self, cx: &DialContext, destination: &Destination)
        -> Result<BoxPacketConn>;
}

impl std::fmt::Debug for dyn Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound").field("tag", &self.tag()).finish()
    }
}

/// A dialable proxy target.
pub trait Outbound: Dialer {
    /// Outbound kind, e.g. `"direct"`, `"shadowsocks"`, `"selector"`.
    fn kind(&self) -> &str;
    /// Tag, unique within the owning provider or registry.
    fn tag(&self) -> &str;
    /// Networks this outbound can carry.
    fn networks(&self) -> NetworkSet;
    /// Tags of outbounds that must start before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }
    /// Downcast to a group view, if this outbound is a group.
    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        None
    }
}

/// An outbound that delegates to a chosen member.
pub trait OutboundGroup: Outbound {
    /// Tag of the currently chosen member, empty if none.
    fn now(&self) -> String;
    /// Tags of all members.
    fn all(&self) -> Vec<String>;
    /// All member outbounds.
    fn outbounds(&self) -> Vec<Arc<dyn Outbound>>;
    /// Member lookup by tag.
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>>;
}

/// A managed collection of outbounds with a refresh contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider kind, e.g. `"http"` or `"memory"`.
    fn kind(&self) -> &str;
    fn tag(&self) -> &str;
    /// Wall-clock time of the last successful load, if any.
    fn updated_at(&self) -> Option<SystemTime>;
    fn outbounds(&self) -> Vec<Arc<dyn Outbound>>;
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>>;
    /// Subscription quota information, when the source reports one.
    fn info(&self) -> Option<ProviderInfo> {
        None
    }
    /// Resolves once the first load attempt finished, regardless of outcome.
    async fn wait(&self);
    /// Forces a refresh now.
    async fn update(&self) -> Result<()>;
    /// Removes every outbound this provider created.
    async fn close(&self) -> Result<()>;
}

/// Adapts an outbound into a plain dialer handle.
pub struct OutboundDialer(pub Arc<dyn Outbound>);

#[async_trait]
impl Dialer for OutboundDialer {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        self.0.dial_stream(cx, destination).await
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        self.0.dial_packet(cx, destination).await
    }
}

/// An outbound viewed through its dial capability only.
pub fn as_dialer(outbound: Arc<dyn Outbound>) -> Arc<dyn Dialer> {
    Arc::new(OutboundDialer(outbound))
}

/// Follows `group.now()` through nested groups until a concrete outbound is
/// reached. Bounded at [`MAX_GROUP_NESTING`] iterations.
pub fn real_outbound(outbound: Arc<dyn Outbound>) -> Result<Arc<dyn Outbound>> {
    let mut redirected = outbound;
    let mut depth = 0;
    loop {
        let next = match redirected.as_group() {
            None => return Ok(redirected),
            Some(group) => {
                depth += 1;
                if depth > MAX_GROUP_NESTING {
                    return Err(Error::GroupNesting);
                }
                let now = group.now();
                group.outbound(&now).ok_or(Error::OutboundNotFound(now))?
            }
        };
        redirected = next;
    }
}
