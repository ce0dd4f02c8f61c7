// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hysteria v1 links.

use serde::{Deserialize, Serialize};
use url::Url;

use super::{escape_component, fragment_of, Link, TlsOptions};
use crate::adapter::OutboundSpec;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HysteriaLink {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub peer: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alpn: String,
    pub up_mbps: u64,
    pub down_mbps: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs_param: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remarks: String,
}

#[derive(Serialize)]
struct HysteriaOptions<'a> {
    server: &'a str,
    server_port: u16,
    up_mbps: u64,
    down_mbps: u64,
    #[serde(skip_serializing_if = "str::is_empty")]
    auth_str: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    obfs: &'a str,
    tls: TlsOptions,
}

pub(super) fn parse(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(HysteriaLink::parse(u)?))
}

impl HysteriaLink {
    pub fn parse(u: &Url) -> Result<Self> {
        if u.scheme() != "hysteria" {
            return Err(Error::BadLink("not a hysteria link".to_string()));
        }
        let port = super::required_port(u)?;
        let mut link = HysteriaLink {
            host: u.host_str().unwrap_or_default().to_string(),
            port,
            remarks: fragment_of(u),
            ..Default::default()
        };
        if link.host.is_empty() {
            return Err(Error::BadLink("host is required".to_string()));
        }
        for (key, value) in u.query_pairs() {
            match key.as_ref() {
                "protocol" => match value.as_ref() {
                    "" | "udp" => link.protocol = "udp".to_string(),
                    "wechat-video" | "faketcp" => {
                        return Err(Error::BadLink(format!("unsupported protocol: {}", value)))
                    }
                    other => {
                        return Err(Error::BadLink(format!("unknown network: {}", other)))
                    }
                },
                "auth" => link.auth = value.to_string(),
                "peer" => link.peer = value.to_string(),
                "insecure" | "allowInsecure" => link.insecure = value == "1",
                "upmbps" => {
                    link.up_mbps = value
                        .parse()
                        .map_err(|_| Error::BadLink(format!("invalid upmbps {}", value)))?;
                }
                "downmbps" => {
                    link.down_mbps = value
                        .parse()
                        .map_err(|_| Error::BadLink(format!("invalid downmbps {}", value)))?;
                }
                "alpn" => link.alpn = value.to_string(),
                "obfs" => link.obfs = value.to_string(),
                "obfsParam" => link.obfs_param = value.to_string(),
                "remarks" => link.remarks = value.to_string(),
                _ => {}
            }
        }
        if link.up_mbps == 0 {
            return Err(Error::BadLink("upmbps is required".to_string()));
        }
        if link.down_mbps == 0 {
            return Err(Error::BadLink("downmbps is required".to_string()));
        }
        Ok(link)
    }
}

impl Link for HysteriaLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        let alpn = if self.alpn.is_empty() {
            Vec::new()
        } else {
            vec![self.alpn.clone()]
        };
        let options = serde_json::to_value(HysteriaOptions {
            server: &self.host,
            server_port: self.port,
            up_mbps: self.up_mbps,
            down_mbps: self.down_mbps,
            auth_str: &self.auth,
            obfs: &self.obfs,
            tls: TlsOptions {
                enabled: true,
                server_name: self.peer.clone(),
                insecure: self.insecure,
                alpn,
            },
        })
        .map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(OutboundSpec {
            tag: self.remarks.clone(),
            kind: "hysteria".to_string(),
            options,
        })
    }

    fn url(&self) -> Result<String> {
        let mut query = vec![
            format!("upmbps={}", self.up_mbps),
            format!("downmbps={}", self.down_mbps),
        ];
        if !self.auth.is_empty() {
            query.push(format!("auth={}", escape_component(&self.auth)));
        }
        if !self.peer.is_empty() {
            query.push(format!("peer={}", escape_component(&self.peer)));
        }
        if self.insecure {
            query.push("insecure=1".to_string());
        }
        if !self.alpn.is_empty() {
            query.push(format!("alpn={}", escape_component(&self.alpn)));
        }
        if !self.obfs.is_empty() {
            query.push(format!("obfs={}", escape_component(&self.obfs)));
        }
        if !self.obfs_param.is_empty() {
            query.push(format!("obfsParam={}", escape_component(&self.obfs_param)));
        }
        let mut url = format!("hysteria://{}:{}?{}", self.host, self.port, query.join("&"));
        if !self.remarks.is_empty() {
            url.push('#');
            url.push_str(&escape_component(&self.remarks));
        }
        Ok(url)
    }
}
