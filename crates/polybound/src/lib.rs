// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Polybound - Outbound Selection & Health Measurement Engine
//!
//! The core of a multi-proxy routing daemon: it continuously measures
//! round-trip latency of a fleet of remote proxy endpoints, selects one
//! endpoint per outgoing connection according to a configured objective and
//! strategy, and keeps the fleet fresh by re-parsing subscription feeds on a
//! schedule.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                         Group Outbounds                            |
//! |        Selector | URLTest | LoadBalance | Chain                    |
//! +--------------------------------------------------------------------+
//! |                           Balancer                                 |
//! |     Node view -> Objective (filter/sort) -> Strategy (pick)        |
//! +--------------------------------------------------------------------+
//! |                         HealthCheck                                |
//! |   probe loop | sliding RTT storage | stats | cleanup loop          |
//! +--------------------------------------------------------------------+
//! |                          Providers                                 |
//! |   RemoteProvider (fetch/parse/diff/cache) | MemoryProvider         |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`adapter::Outbound`] | A dialable proxy target with a tag and network set |
//! | [`adapter::Provider`] | A managed collection of outbounds with a refresh contract |
//! | [`healthcheck::HealthCheck`] | Concurrent RTT prober with per-endpoint windows |
//! | [`balancer::Balancer`] | Objective/strategy composition over the health view |
//! | [`provider::RemoteProvider`] | Periodic subscription fetcher |
//!
//! Concrete proxy protocol dialers are out of scope; the crate ships only
//! trivial `direct` and `block` outbounds so groups and tests have something
//! real to dial through.

/// Core traits: dialers, outbounds, groups, providers, the outbound registry.
pub mod adapter;
/// Load balancer: node view, objectives, pick strategies.
pub mod balancer;
/// Bounded-concurrency fan-out primitive.
pub mod batch;
/// Persisted selector state and the binary cache envelope.
pub mod cachefile;
/// Dial context plumbing (timeouts, chain redirects).
pub mod dialer;
mod error;
/// Group outbounds: Selector, URLTest, LoadBalance, Chain.
pub mod group;
/// RTT probing, sliding storage, statistics.
pub mod healthcheck;
/// Subscription link parsers (ss, vmess, vless, trojan, hysteria, ...).
pub mod link;
/// Built-in `direct` and `block` outbounds.
pub mod outbound;
/// Subscription providers and content parsing.
pub mod provider;
/// Minimal HTTP/1.1 client over arbitrary dialers, and the URL probe.
pub mod transport;

pub use error::{Error, Result};
pub use healthcheck::Rtt;
