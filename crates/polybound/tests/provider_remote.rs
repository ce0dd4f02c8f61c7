// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote provider: fetch, reconcile, cache-file fallback.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use polybound::adapter::{Outbound, OutboundManager, Provider};
use polybound::outbound::BlockOutbound;
use polybound::provider::{RemoteOptions, RemoteProvider};

const SUBSCRIPTION: &str = "STATUS=🚀↑:0.53GB,↓:14.07GB,TOT:160GB💡Expires:2023-12-05\n\
                            socks5://h1.example:1080#alpha\n\
                            socks5://h2.example:1080#beta\n";

fn manager_with_socks() -> Arc<OutboundManager> {
    let manager = Arc::new(OutboundManager::new());
    // proxy protocol dialers live outside the engine; a stub factory
    // stands in for them
    manager.register_factory(
        "socks",
        Arc::new(|params| Ok(Arc::new(BlockOutbound::new(params.tag)) as Arc<dyn Outbound>)),
    );
    manager
}

/// Serves one HTTP response per connection until dropped.
async fn spawn_subscription_server(body: String) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

#[tokio::test]
async fn test_fetch_parses_and_creates_outbounds() {
    let port = spawn_subscription_server(SUBSCRIPTION.to_string()).await;
    let manager = manager_with_socks();
    let provider = RemoteProvider::new(
        manager.clone(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port),
            ..Default::default()
        },
    )
    .unwrap();

    provider.update().await.unwrap();
    let tags: Vec<String> = provider
        .outbounds()
        .iter()
        .map(|o| o.tag().to_string())
        .collect();
    assert_eq!(tags, vec!["sub/alpha".to_string(), "sub/beta".to_string()]);
    assert!(manager.outbound("sub/alpha").is_some());
    assert_eq!(provider.info().unwrap().total, 160 * 1024 * 1024 * 1024);
    assert!(provider.updated_at().is_some());

    // identical content: no churn, same instances
    let before = provider.outbound("sub/alpha").unwrap();
    provider.update().await.unwrap();
    let after = provider.outbound("sub/alpha").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_include_exclude_filters() {
    let port = spawn_subscription_server(SUBSCRIPTION.to_string()).await;
    let provider = RemoteProvider::new(
        manager_with_socks(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port),
            include: Some("alpha|beta".to_string()),
            exclude: Some("beta".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    provider.update().await.unwrap();
    let tags: Vec<String> = provider
        .outbounds()
        .iter()
        .map(|o| o.tag().to_string())
        .collect();
    // exclude wins over include
    assert_eq!(tags, vec!["sub/alpha".to_string()]);
}

#[tokio::test]
async fn test_cache_file_fallback_when_network_is_down() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("sub.cache");
    std::fs::write(&cache_path, SUBSCRIPTION).unwrap();
    let cache_mtime = std::fs::metadata(&cache_path).unwrap().modified().unwrap();

    let manager = manager_with_socks();
    let provider = RemoteProvider::new(
        manager.clone(),
        "sub",
        RemoteOptions {
            // nothing listens here
            url: "http://127.0.0.1:1/sub".to_string(),
            cache_file: Some(cache_path),
            ..Default::default()
        },
    )
    .unwrap();

    provider.update().await.unwrap();
    // the cache mtime is authoritative for the snapshot time
    assert_eq!(provider.updated_at().unwrap(), cache_mtime);
    let tags: Vec<String> = provider
        .outbounds()
        .iter()
        .map(|o| o.tag().to_string())
        .collect();
    assert_eq!(tags, vec!["sub/alpha".to_string(), "sub/beta".to_string()]);
    let info = provider.info().unwrap();
    assert_eq!(info.expire, 1_701_734_400);
    assert_eq!(info.download, (14.07f64 * 1024.0 * 1024.0 * 1024.0) as u64);
}

#[tokio::test]
async fn test_no_cache_no_network_stays_empty() {
    let provider = RemoteProvider::new(
        manager_with_socks(),
        "sub",
        RemoteOptions {
            url: "http://127.0.0.1:1/sub".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(provider.update().await.is_err());
    assert!(provider.outbounds().is_empty());
    // readiness fired anyway
    provider.wait().await;
}

#[tokio::test]
async fn test_successful_fetch_writes_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("sub.cache");
    let port = spawn_subscription_server(SUBSCRIPTION.to_string()).await;
    let provider = RemoteProvider::new(
        manager_with_socks(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port),
            cache_file: Some(cache_path.clone()),
            ..Default::default()
        },
    )
    .unwrap();
    provider.update().await.unwrap();
    assert_eq!(std::fs::read_to_string(&cache_path).unwrap(), SUBSCRIPTION);
}

#[tokio::test]
async fn test_close_removes_outbounds_from_registry() {
    let port = spawn_subscription_server(SUBSCRIPTION.to_string()).await;
    let manager = manager_with_socks();
    let provider = RemoteProvider::new(
        manager.clone(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port),
            ..Default::default()
        },
    )
    .unwrap();
    provider.update().await.unwrap();
    assert!(manager.outbound("sub/alpha").is_some());

    provider.close().await.unwrap();
    assert!(manager.outbound("sub/alpha").is_none());
    assert!(manager.outbound("sub/beta").is_none());
    assert!(provider.outbounds().is_empty());
}

#[tokio::test]
async fn test_start_runs_first_refresh() {
    let port = spawn_subscription_server(SUBSCRIPTION.to_string()).await;
    let provider = RemoteProvider::new(
        manager_with_socks(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port),
            ..Default::default()
        },
    )
    .unwrap();
    provider.start().unwrap();
    provider.wait().await;
    assert_eq!(provider.outbounds().len(), 2);
    provider.close().await.unwrap();
}

#[tokio::test]
async fn test_membership_follows_subscription_changes() {
    // two servers with different content stand in for a changed feed
    let port_a = spawn_subscription_server(SUBSCRIPTION.to_string()).await;
    let manager = manager_with_socks();
    let provider = RemoteProvider::new(
        manager.clone(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port_a),
            ..Default::default()
        },
    )
    .unwrap();
    provider.update().await.unwrap();
    assert!(provider.outbound("sub/beta").is_some());

    let changed = "socks5://h1.example:1080#alpha\nsocks5://h3.example:1080#gamma\n";
    let port_b = spawn_subscription_server(changed.to_string()).await;
    let provider_b = RemoteProvider::new(
        manager.clone(),
        "sub",
        RemoteOptions {
            url: format!("http://127.0.0.1:{}/sub", port_b),
            ..Default::default()
        },
    )
    .unwrap();
    provider_b.update().await.unwrap();
    assert!(provider_b.outbound("sub/gamma").is_some());
    assert!(manager.outbound("sub/gamma").is_some());
    // beta was not re-created by the new membership
    assert!(provider_b.outbound("sub/beta").is_none());
}
