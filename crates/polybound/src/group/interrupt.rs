// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection interruption for selector switches.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::adapter::{BoxPacketConn, BoxStream, Destination};

/// Tracks live connections of a group so a selection switch can cut them.
#[derive(Default)]
pub struct Group {
    conns: Mutex<Vec<Conn>>,
}

struct Conn {
    external: bool,
    token: CancellationToken,
}

impl Group {
    pub fn new() -> Self {
        Group::default()
    }

    /// Wraps a dialed stream so it can be interrupted later.
    pub fn new_conn(&self, stream: BoxStream, external: bool) -> BoxStream {
        let token = CancellationToken::new();
        let mut conns = self.conns.lock();
        conns.retain(|conn| !conn.token.is_cancelled());
        conns.push(Conn {
            external,
            token: token.clone(),
        });
        drop(conns);
        Box::new(TrackedStream {
            inner: stream,
            token,
        })
    }

    /// Cuts tracked connections; external ones only when asked.
    pub fn interrupt(&self, include_external: bool) {
        let mut conns = self.conns.lock();
        for conn in conns.iter() {
            if include_external || !conn.external {
                conn.token.cancel();
            }
        }
        conns.retain(|conn| !conn.token.is_cancelled());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.conns.lock().len()
    }
}

impl Group {
    /// Wraps a dialed packet connection so it can be interrupted later.
    pub fn new_packet_conn(&self, conn: BoxPacketConn, external: bool) -> BoxPacketConn {
        let token = CancellationToken::new();
        let mut conns = self.conns.lock();
        conns.retain(|conn| !conn.token.is_cancelled());
        conns.push(Conn {
            external,
            token: token.clone(),
        });
        drop(conns);
        Box::new(TrackedPacketConn { inner: conn, token })
    }
}

struct TrackedPacketConn {
    inner: BoxPacketConn,
    token: CancellationToken,
}

#[async_trait::async_trait]
impl crate::adapter::PacketConn for TrackedPacketConn {
    async fn send_to(&self, buf: &[u8], destination: &Destination) -> crate::Result<usize> {
        if self.token.is_cancelled() {
            return Err(crate::Error::Io(TrackedStream::interrupted()));
        }
        self.inner.send_to(buf, destination).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> crate::Result<(usize, std::net::SocketAddr)> {
        tokio::select! {
            _ = self.token.cancelled() => Err(crate::Error::Io(TrackedStream::interrupted())),
            received = self.inner.recv_from(buf) => received,
        }
    }
}

impl Drop for TrackedPacketConn {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct TrackedStream {
    inner: BoxStream,
    token: CancellationToken,
}

impl TrackedStream {
    fn interrupted() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "connection interrupted")
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.token.is_cancelled() {
            return Poll::Ready(Err(Self::interrupted()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.token.is_cancelled() {
            return Poll::Ready(Err(Self::interrupted()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        // lets the group prune this entry on the next registration
        self.token.cancel();
    }
}
