// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal HTTP/1.1 client over arbitrary dialers.
//!
//! Both the health probe and the subscription download must issue requests
//! through a configurable outbound, so a connection-pool client is of no
//! use here: every request dials a fresh stream through the given
//! [`Dialer`], optionally wraps it in TLS, and drives a single
//! `hyper` http1 connection. Redirects are not followed, matching the
//! original engine's use-last-response behavior.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header;
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

use crate::adapter::{BoxStream, Destination, Dialer};
use crate::dialer::DialContext;
use crate::healthcheck::Rtt;
use crate::{Error, Result};

/// TLS handshake budget, separate from the per-request timeout.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Response of a single-shot request.
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Elapsed from request start (before dialing) to the response head.
    pub first_byte: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Single-shot HTTP/1.1 client dialing through an outbound.
pub struct HttpClient {
    dialer: Arc<dyn Dialer>,
    user_agent: Option<String>,
}

impl HttpClient {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        HttpClient {
            dialer,
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Issues a GET. The dial context's timeout bounds the whole request;
    /// its cancellation token aborts it with [`Error::Canceled`].
    pub async fn get(&self, cx: &DialContext, url: &str) -> Result<HttpResponse> {
        let request = self.get_inner(cx, url);
        let request = async {
            match cx.timeout() {
                Some(timeout) => tokio::time::timeout(timeout, request)
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => request.await,
            }
        };
        match cx.cancellation() {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Canceled),
                    result = request => result,
                }
            }
            None => request.await,
        }
    }

    async fn get_inner(&self, cx: &DialContext, url: &str) -> Result<HttpResponse> {
        let url = Url::parse(url).map_err(|err| Error::Http(format!("invalid url: {}", err)))?;
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(Error::Http(format!("unsupported scheme: {}", other))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::Http("url has no host".to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Http("url has no port".to_string()))?;
        let destination = Destination::new(host.clone(), port);

        let start = Instant::now();
        let stream = self.dialer.dial_stream(cx, &destination).await?;
        let stream = if tls {
            tls_handshake(stream, &host).await?
        } else {
            stream
        };

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|err| Error::Http(err.to_string()))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let default_port = if tls { 443 } else { 80 };
        let host_header = if port == default_port {
            host.clone()
        } else {
            format!("{}:{}", host, port)
        };
        let mut builder = Request::get(path)
            .header(header::HOST, host_header)
            .header(header::CONNECTION, "close");
        if let Some(user_agent) = &self.user_agent {
            builder = builder.header(header::USER_AGENT, user_agent);
        }
        let request = builder
            .body(Empty::<Bytes>::new())
            .map_err(|err| Error::Http(err.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|err| Error::Http(err.to_string()))?;
        let first_byte = start.elapsed();
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| Error::Http(err.to_string()))?
            .to_bytes();
        Ok(HttpResponse {
            status,
            body,
            first_byte,
        })
    }
}

async fn tls_handshake(stream: BoxStream, host: &str) -> Result<BoxStream> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|err| Error::Tls(format!("invalid server name: {}", err)))?;
    let tls_stream = tokio::time::timeout(
        TLS_HANDSHAKE_TIMEOUT,
        connector.connect(server_name, stream),
    )
    .await
    .map_err(|_| Error::Timeout)?
    .map_err(|err| Error::Tls(err.to_string()))?;
    Ok(Box::new(tls_stream))
}

/// Probes `destination_url` through `dialer` and reports the elapsed time
/// to the first response byte.
///
/// Any 2xx status counts as success. A sub-millisecond round trip reports
/// 1 ms so a success can never collide with the failed sentinel.
pub async fn url_test(cx: &DialContext, destination_url: &str, dialer: &Arc<dyn Dialer>) -> Result<Rtt> {
    let client = HttpClient::new(dialer.clone());
    let response = client.get(cx, destination_url).await?;
    if !response.is_success() {
        return Err(Error::UnexpectedStatus(response.status));
    }
    let rtt = Rtt::from_duration(response.first_byte);
    Ok(if rtt.is_failed() { Rtt(1) } else { rtt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::DirectOutbound;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// One-shot HTTP server returning a canned response.
    async fn serve_once(response: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_url_test_success() {
        let port = serve_once("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        let dialer: Arc<dyn Dialer> = Arc::new(DirectOutbound::new("d"));
        let cx = DialContext::new().with_timeout(Duration::from_secs(5));
        let rtt = url_test(&cx, &format!("http://127.0.0.1:{}/generate_204", port), &dialer)
            .await
            .unwrap();
        assert!(!rtt.is_failed());
    }

    #[tokio::test]
    async fn test_url_test_bad_status() {
        let port = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dialer: Arc<dyn Dialer> = Arc::new(DirectOutbound::new("d"));
        let cx = DialContext::new().with_timeout(Duration::from_secs(5));
        let err = url_test(&cx, &format!("http://127.0.0.1:{}/", port), &dialer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus(503)));
    }

    #[tokio::test]
    async fn test_get_reads_body() {
        let port = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let dialer: Arc<dyn Dialer> = Arc::new(DirectOutbound::new("d"));
        let client = HttpClient::new(dialer).with_user_agent("polybound-test");
        let cx = DialContext::new().with_timeout(Duration::from_secs(5));
        let response = client
            .get(&cx, &format!("http://127.0.0.1:{}/sub", port))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"hello");
    }

    #[tokio::test]
    async fn test_unreachable_is_an_error() {
        let dialer: Arc<dyn Dialer> = Arc::new(DirectOutbound::new("d"));
        let cx = DialContext::new().with_timeout(Duration::from_millis(800));
        let result = url_test(&cx, "http://127.0.0.1:1/", &dialer).await;
        assert!(result.is_err());
    }
}
