// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! VLESS links in the Xray URI shape.
//!
//! `vless://uuid@host:port?type=ws&security=tls&sni=...&path=...#tag`

use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    escape_component, fragment_of, username_of, Link, TlsOptions, TransportOptions,
    TRANSPORT_GRPC, TRANSPORT_HTTP, TRANSPORT_QUIC, TRANSPORT_WEBSOCKET,
};
use crate::adapter::OutboundSpec;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VlessLink {
    pub server: String,
    pub port: u16,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// `tcp`, `ws`, `http`, `grpc`, `quic` or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    /// `none`, `tls` or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub security: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sni: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_insecure: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub flow: String,
}

#[derive(Serialize)]
struct VlessOptions<'a> {
    server: &'a str,
    server_port: u16,
    uuid: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    flow: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<TlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transport: Option<TransportOptions>,
}

pub(super) fn parse(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(VlessLink::parse(u)?))
}

impl VlessLink {
    pub fn parse(u: &Url) -> Result<Self> {
        if u.scheme() != "vless" {
            return Err(Error::BadLink("not a vless link".to_string()));
        }
        let port = super::required_port(u)?;
        let mut link = VlessLink {
            server: u.host_str().unwrap_or_default().to_string(),
            port,
            uuid: username_of(u)?,
            tag: fragment_of(u),
            ..Default::default()
        };
        if link.uuid.is_empty() {
            return Err(Error::BadLink("uuid is required".to_string()));
        }
        for (key, value) in u.query_pairs() {
            match key.as_ref() {
                "type" => link.transport_type = value.to_string(),
                "host" => link.host = value.to_string(),
                "path" => link.path = value.to_string(),
                "serviceName" => link.service_name = value.to_string(),
                "security" => link.security = value.to_string(),
                "sni" => link.sni = value.to_string(),
                "alpn" => {
                    link.alpn = value.split(',').map(|s| s.trim().to_string()).collect();
                }
                "allowInsecure" => link.allow_insecure = value == "1" || value == "true",
                "flow" => link.flow = value.to_string(),
                _ => {}
            }
        }
        match link.transport_type.as_str() {
            "" | "tcp" | "ws" | "http" | "grpc" | "quic" => {}
            other => {
                return Err(Error::BadLink(format!("unsupported transport: {}", other)))
            }
        }
        Ok(link)
    }

    fn transport_options(&self) -> Option<TransportOptions> {
        let kind = match self.transport_type.as_str() {
            "" | "tcp" => return None,
            "ws" => TRANSPORT_WEBSOCKET,
            "http" => TRANSPORT_HTTP,
            "grpc" => TRANSPORT_GRPC,
            "quic" => TRANSPORT_QUIC,
            other => other,
        };
        Some(TransportOptions {
            kind: kind.to_string(),
            host: self.host.clone(),
            path: self.path.clone(),
            service_name: self.service_name.clone(),
        })
    }
}

impl Link for VlessLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        let tls = (self.security == "tls").then(|| TlsOptions {
            enabled: true,
            server_name: self.sni.clone(),
            insecure: self.allow_insecure,
            alpn: self.alpn.clone(),
        });
        let options = serde_json::to_value(VlessOptions {
            server: &self.server,
            server_port: self.port,
            uuid: &self.uuid,
            flow: &self.flow,
            tls,
            transport: self.transport_options(),
        })
        .map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(OutboundSpec {
            tag: self.tag.clone(),
            kind: "vless".to_string(),
            options,
        })
    }

    fn url(&self) -> Result<String> {
        let mut query = Vec::new();
        if !self.transport_type.is_empty() {
            query.push(format!("type={}", self.transport_type));
        }
        if !self.security.is_empty() {
            query.push(format!("security={}", self.security));
        }
        if !self.sni.is_empty() {
            query.push(format!("sni={}", escape_component(&self.sni)));
        }
        if !self.alpn.is_empty() {
            query.push(format!("alpn={}", escape_component(&self.alpn.join(","))));
        }
        if self.allow_insecure {
            query.push("allowInsecure=1".to_string());
        }
        if !self.host.is_empty() {
            query.push(format!("host={}", escape_component(&self.host)));
        }
        if !self.path.is_empty() {
            query.push(format!("path={}", escape_component(&self.path)));
        }
        if !self.service_name.is_empty() {
            query.push(format!("serviceName={}", escape_component(&self.service_name)));
        }
        if !self.flow.is_empty() {
            query.push(format!("flow={}", escape_component(&self.flow)));
        }
        let mut url = format!(
            "vless://{}@{}:{}",
            escape_component(&self.uuid),
            self.server,
            self.port
        );
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        if !self.tag.is_empty() {
            url.push('#');
            url.push_str(&escape_component(&self.tag));
        }
        Ok(url)
    }
}
