// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! VMess links.
//!
//! Two wire shapes share the `vmess://` scheme: the V2RayNG base64-JSON
//! document and the ShadowRocket `base64(security:uuid@host:port)` form.
//! Both parse into the same [`Vmess`] record.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{
    base64_decode, base64_encode, escape_component, Link, TlsOptions, TransportOptions,
    TRANSPORT_GRPC, TRANSPORT_HTTP, TRANSPORT_QUIC, TRANSPORT_WEBSOCKET,
};
use crate::adapter::OutboundSpec;
use crate::{Error, Result};

/// Normalized vmess endpoint description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vmess {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    pub server: String,
    pub server_port: u16,
    pub uuid: String,
    #[serde(default)]
    pub alter_id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub security: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport_host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport_path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tls: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sni: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

#[derive(Serialize)]
struct VmessOptions<'a> {
    server: &'a str,
    server_port: u16,
    uuid: &'a str,
    alter_id: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    security: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<TlsOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transport: Option<TransportOptions>,
}

impl Vmess {
    fn outbound_spec(&self) -> Result<OutboundSpec> {
        let tls = self.tls.then(|| TlsOptions {
            enabled: true,
            server_name: self.sni.clone(),
            insecure: false,
            alpn: self.alpn.clone(),
        });
        let transport = (!self.transport.is_empty()).then(|| TransportOptions {
            kind: self.transport.clone(),
            host: self.transport_host.clone(),
            path: self.transport_path.clone(),
            ..Default::default()
        });
        let options = serde_json::to_value(VmessOptions {
            server: &self.server,
            server_port: self.server_port,
            uuid: &self.uuid,
            alter_id: self.alter_id,
            security: &self.security,
            tls,
            transport,
        })
        .map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(OutboundSpec {
            tag: self.tag.clone(),
            kind: "vmess".to_string(),
            options,
        })
    }
}

// ============================================================================
// V2RayNG document
// ============================================================================

/// The V2RayNG share document, version 2.
#[derive(Debug, Default, Serialize, Deserialize)]
struct VmessNgWire {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    v: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    ps: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    add: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    port: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    aid: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    scy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    net: String,
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    tls: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sni: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    alpn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    fp: String,
}

/// Share documents carry numbers as either JSON numbers or strings.
fn number_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmessNgLink(pub Vmess);

pub(super) fn parse_ng(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(VmessNgLink::parse(u)?))
}

impl VmessNgLink {
    pub fn parse(u: &Url) -> Result<Self> {
        if u.scheme() != "vmess" {
            return Err(Error::BadLink("not a vmess link".to_string()));
        }
        // base64 payloads with '/' split into host + path
        let b64 = format!("{}{}", u.host_str().unwrap_or_default(), u.path());
        let decoded = base64_decode(&b64)?;
        let wire: VmessNgWire = serde_json::from_slice(&decoded)
            .map_err(|_| Error::BadLink("bad format".to_string()))?;
        if number_of(&wire.v) != Some(2) {
            return Err(Error::BadLink(format!("unsupported version {}", wire.v)));
        }
        match wire.kind.as_str() {
            "none" | "" => {}
            other => return Err(Error::BadLink(format!("unsupported type {}", other))),
        }
        let transport = match wire.net.as_str() {
            "ws" | "websocket" => TRANSPORT_WEBSOCKET,
            "http" | "h2" => TRANSPORT_HTTP,
            "quic" => TRANSPORT_QUIC,
            "grpc" => TRANSPORT_GRPC,
            // "kcp", "tcp", ...
            other => return Err(Error::BadLink(format!("unsupported transport {}", other))),
        };
        let alpn: Vec<String> = if wire.alpn.is_empty() {
            Vec::new()
        } else {
            wire.alpn.split(',').map(|s| s.trim().to_string()).collect()
        };
        Ok(VmessNgLink(Vmess {
            tag: wire.ps,
            server: wire.add,
            server_port: number_of(&wire.port)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| Error::BadLink("invalid port".to_string()))?,
            uuid: wire.id,
            alter_id: number_of(&wire.aid).unwrap_or(0) as u32,
            security: wire.scy,
            transport: transport.to_string(),
            transport_host: wire.host,
            transport_path: wire.path,
            tls: wire.tls == "tls",
            sni: wire.sni,
            alpn,
            fingerprint: wire.fp,
        }))
    }
}

impl Link for VmessNgLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        self.0.outbound_spec()
    }

    fn url(&self) -> Result<String> {
        let v = &self.0;
        let net = match v.transport.as_str() {
            TRANSPORT_WEBSOCKET => "ws",
            TRANSPORT_HTTP => "http",
            TRANSPORT_QUIC => "quic",
            other => other,
        };
        let wire = VmessNgWire {
            v: Value::from(2),
            ps: v.tag.clone(),
            add: v.server.clone(),
            port: Value::from(v.server_port),
            id: v.uuid.clone(),
            aid: Value::from(v.alter_id),
            scy: v.security.clone(),
            net: net.to_string(),
            host: v.transport_host.clone(),
            path: v.transport_path.clone(),
            tls: if v.tls { "tls".to_string() } else { String::new() },
            sni: v.sni.clone(),
            alpn: v.alpn.join(","),
            fp: v.fingerprint.clone(),
            ..Default::default()
        };
        let json = serde_json::to_vec(&wire).map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(format!("vmess://{}", base64_encode(&json)))
    }
}

// ============================================================================
// ShadowRocket form
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VmessRocketLink(pub Vmess);

pub(super) fn parse_rocket(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(VmessRocketLink::parse(u)?))
}

impl VmessRocketLink {
    pub fn parse(u: &Url) -> Result<Self> {
        if u.scheme() != "vmess" {
            return Err(Error::BadLink("not a vmess link".to_string()));
        }
        let decoded = base64_decode(u.host_str().unwrap_or_default())?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::BadLink("bad format".to_string()))?;
        // auto:uuid@192.168.100.1:443
        let host_url = Url::parse(&format!("vmess://{}", decoded))
            .map_err(|_| Error::BadLink("bad format".to_string()))?;
        let mut link = Vmess {
            security: {
                let sec = host_url.username();
                if sec.is_empty() { "auto" } else { sec }.to_string()
            },
            uuid: host_url.password().unwrap_or_default().to_string(),
            server: host_url.host_str().unwrap_or_default().to_string(),
            server_port: super::required_port(&host_url)?,
            alter_id: 0,
            ..Default::default()
        };
        for (key, value) in u.query_pairs() {
            match key.as_ref() {
                "remarks" => link.tag = value.to_string(),
                "path" => link.transport_path = value.to_string(),
                "tls" => link.tls = value == "tls",
                "obfs" => match value.as_ref() {
                    "ws" | "websocket" => link.transport = TRANSPORT_WEBSOCKET.to_string(),
                    "http" => link.transport = TRANSPORT_HTTP.to_string(),
                    _ => {}
                },
                "obfsParam" => link.transport_host = value.to_string(),
                _ => {}
            }
        }
        Ok(VmessRocketLink(link))
    }
}

impl Link for VmessRocketLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        self.0.outbound_spec()
    }

    fn url(&self) -> Result<String> {
        let v = &self.0;
        let security = if v.security.is_empty() { "auto" } else { &v.security };
        // URL-safe alphabet: the payload sits in the authority section,
        // where '/' from the standard alphabet would end the host
        let host = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{}:{}@{}:{}", security, v.uuid, v.server, v.server_port).as_bytes());
        let mut query = Vec::new();
        if !v.tag.is_empty() {
            query.push(format!("remarks={}", escape_component(&v.tag)));
        }
        if !v.transport_path.is_empty() {
            query.push(format!("path={}", escape_component(&v.transport_path)));
        }
        if v.tls {
            query.push("tls=tls".to_string());
        }
        match v.transport.as_str() {
            TRANSPORT_WEBSOCKET => query.push("obfs=ws".to_string()),
            TRANSPORT_HTTP => query.push("obfs=http".to_string()),
            _ => {}
        }
        if !v.transport_host.is_empty() {
            query.push(format!("obfsParam={}", escape_component(&v.transport_host)));
        }
        let mut url = format!("vmess://{}", host);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        Ok(url)
    }
}
