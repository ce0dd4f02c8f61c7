// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in outbounds.
//!
//! Proxy protocol dialers live outside this crate; what ships here is the
//! pair every deployment needs anyway: `direct` (plain TCP/UDP via the
//! host stack) and `block` (rejects everything). Both register with the
//! [`OutboundManager`] factory table so subscription reconciliation and
//! chain duplication can exercise the real code paths.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::{TcpStream, UdpSocket};

use crate::adapter::{
    BoxPacketConn, BoxStream, Destination, Dialer, NetworkSet, Outbound, OutboundManager,
};
use crate::dialer::{ChainRedirectDialer, DialContext};
use crate::{Error, Result};

/// Plain host-stack dialer used by `direct` and as every chain fallback.
pub struct SystemDialer;

#[async_trait]
impl Dialer for SystemDialer {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        let addr = (destination.host.as_str(), destination.port);
        let stream = match cx.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| Error::Timeout)??,
            None => TcpStream::connect(addr).await?,
        };
        Ok(Box::new(stream))
    }

    async fn dial_packet(&self, _: &DialContext, _: &Destination) -> Result<BoxPacketConn> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Box::new(SystemPacketConn { socket }))
    }
}

struct SystemPacketConn {
    socket: UdpSocket,
}

#[async_trait]
impl crate::adapter::PacketConn for SystemPacketConn {
    async fn send_to(&self, buf: &[u8], destination: &Destination) -> Result<usize> {
        let sent = self
            .socket
            .send_to(buf, (destination.host.as_str(), destination.port))
            .await?;
        Ok(sent)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let received = self.socket.recv_from(buf).await?;
        Ok(received)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DirectOptions {}

/// Dials destinations directly through the host network stack.
pub struct DirectOutbound {
    tag: String,
    dialer: ChainRedirectDialer,
}

impl DirectOutbound {
    pub fn new(tag: impl Into<String>) -> Self {
        Self::with_detour(tag, None)
    }

    /// `detour`: dial through another outbound instead of the host stack;
    /// a chain redirect in the dial context still takes precedence.
    pub fn with_detour(tag: impl Into<String>, detour: Option<Arc<dyn Dialer>>) -> Self {
        let tag = tag.into();
        let system: Arc<dyn Dialer> = Arc::new(SystemDialer);
        let dialer = ChainRedirectDialer::new(
            tag.clone(),
            true,
            detour.unwrap_or_else(|| system.clone()),
            system,
        );
        DirectOutbound { tag, dialer }
    }
}

#[async_trait]
impl Dialer for DirectOutbound {
    async fn dial_stream(&self, cx: &DialContext, destination: &Destination) -> Result<BoxStream> {
        self.dialer.dial_stream(cx, destination).await
    }

    async fn dial_packet(
        &self,
        cx: &DialContext,
        destination: &Destination,
    ) -> Result<BoxPacketConn> {
        self.dialer.dial_packet(cx, destination).await
    }
}

impl Outbound for DirectOutbound {
    fn kind(&self) -> &str {
        "direct"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn networks(&self) -> NetworkSet {
        NetworkSet::BOTH
    }
}

/// Rejects every dial.
pub struct BlockOutbound {
    tag: String,
}

impl BlockOutbound {
    pub fn new(tag: impl Into<String>) -> Self {
        BlockOutbound { tag: tag.into() }
    }

    fn blocked(&self) -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("[{}] connection blocked", self.tag),
        ))
    }
}

#[async_trait]
impl Dialer for BlockOutbound {
    async fn dial_stream(&self, _: &DialContext, _: &Destination) -> Result<BoxStream> {
        Err(self.blocked())
    }

    async fn dial_packet(&self, _: &DialContext, _: &Destination) -> Result<BoxPacketConn> {
        Err(self.blocked())
    }
}

impl Outbound for BlockOutbound {
    fn kind(&self) -> &str {
        "block"
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn networks(&self) -> NetworkSet {
        NetworkSet::BOTH
    }
}

/// Registers factories for the built-in outbound kinds.
pub fn register_builtins(manager: &OutboundManager) {
    manager.register_factory(
        "direct",
        Arc::new(|params| {
            let _: DirectOptions = serde_json::from_value(params.options)
                .map_err(|err| Error::Config(format!("direct options: {}", err)))?;
            Ok(Arc::new(DirectOutbound::with_detour(
                params.tag,
                params.detour_override,
            )) as Arc<dyn Outbound>)
        }),
    );
    manager.register_factory(
        "block",
        Arc::new(|params| {
            Ok(Arc::new(BlockOutbound::new(params.tag)) as Arc<dyn Outbound>)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_rejects() {
        let block = BlockOutbound::new("b");
        let err = block
            .dial_stream(&DialContext::new(), &Destination::new("example.com", 80))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_direct_dials_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await });

        let direct = DirectOutbound::new("d");
        let stream = direct
            .dial_stream(&DialContext::new(), &Destination::new("127.0.0.1", port))
            .await;
        assert!(stream.is_ok());
        assert!(accept.await.unwrap().is_ok());
    }

    #[test]
    fn test_builtin_factories() {
        let manager = OutboundManager::new();
        register_builtins(&manager);
        manager.create("d", "direct", serde_json::json!({})).unwrap();
        manager.create("b", "block", serde_json::json!({})).unwrap();
        assert_eq!(manager.outbound("d").unwrap().kind(), "direct");
        assert_eq!(manager.outbound("b").unwrap().kind(), "block");
    }
}
