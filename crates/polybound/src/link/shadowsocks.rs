// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SIP002 shadowsocks links.
//!
//! `ss://base64(method:password)@host:port?plugin=...#tag` or the plain
//! `ss://method:password@host:port` form with percent-encoded userinfo.

use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{base64_decode, escape_component, fragment_of, query_unescape, Link};
use crate::adapter::OutboundSpec;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksLink {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ps: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin_opts: String,
}

#[derive(Serialize)]
struct ShadowsocksOptions<'a> {
    server: &'a str,
    server_port: u16,
    method: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    plugin: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    plugin_opts: &'a str,
}

pub(super) fn parse(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(ShadowsocksLink::parse(u)?))
}

impl ShadowsocksLink {
    pub fn parse(u: &Url) -> Result<Self> {
        if u.scheme() != "ss" {
            return Err(Error::BadLink("not a ss link".to_string()));
        }
        let port = super::required_port(u)?;
        let mut link = ShadowsocksLink {
            address: u.host_str().unwrap_or_default().to_string(),
            port,
            ps: fragment_of(u),
            ..Default::default()
        };
        for (key, value) in u.query_pairs() {
            if key == "plugin" {
                let mut parts = value.splitn(2, ';');
                link.plugin = parts.next().unwrap_or_default().to_string();
                link.plugin_opts = parts.next().unwrap_or_default().to_string();
            }
        }
        let username = u.username();
        if !username.is_empty() {
            match u.password() {
                Some(password) => {
                    link.method = query_unescape(username)?;
                    link.password = query_unescape(password)?;
                }
                None => {
                    let decoded = base64_decode(username)?;
                    let decoded = String::from_utf8(decoded)
                        .map_err(|_| Error::BadLink("userinfo is not utf-8".to_string()))?;
                    let mut parts = decoded.splitn(2, ':');
                    link.method = parts.next().unwrap_or_default().to_string();
                    link.password = parts.next().unwrap_or_default().to_string();
                }
            }
        }
        Ok(link)
    }
}

impl Link for ShadowsocksLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        let options = serde_json::to_value(ShadowsocksOptions {
            server: &self.address,
            server_port: self.port,
            method: &self.method,
            password: &self.password,
            plugin: &self.plugin,
            plugin_opts: &self.plugin_opts,
        })
        .map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(OutboundSpec {
            tag: self.ps.clone(),
            kind: "shadowsocks".to_string(),
            options,
        })
    }

    fn url(&self) -> Result<String> {
        // URL-safe alphabet: the standard one can emit '/' and break the
        // authority section
        let userinfo = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{}:{}", self.method, self.password).as_bytes());
        let mut url = format!("ss://{}@{}:{}", userinfo, self.address, self.port);
        if !self.plugin.is_empty() {
            let plugin = if self.plugin_opts.is_empty() {
                self.plugin.clone()
            } else {
                format!("{};{}", self.plugin, self.plugin_opts)
            };
            url.push_str("?plugin=");
            url.push_str(&escape_component(&plugin));
        }
        if !self.ps.is_empty() {
            url.push('#');
            url.push_str(&escape_component(&self.ps));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base64_userinfo() {
        // aes-128-gcm:test
        let url = Url::parse("ss://YWVzLTEyOC1nY206dGVzdA@192.168.100.1:8888#Example").unwrap();
        let link = ShadowsocksLink::parse(&url).unwrap();
        assert_eq!(link.method, "aes-128-gcm");
        assert_eq!(link.password, "test");
        assert_eq!(link.address, "192.168.100.1");
        assert_eq!(link.port, 8888);
        assert_eq!(link.ps, "Example");
    }

    #[test]
    fn test_parse_plain_userinfo_with_plugin() {
        let url = Url::parse(
            "ss://aes-128-gcm:pass@host.example:8388/?plugin=obfs-local%3Bobfs%3Dhttp#tag",
        )
        .unwrap();
        let link = ShadowsocksLink::parse(&url).unwrap();
        assert_eq!(link.method, "aes-128-gcm");
        assert_eq!(link.password, "pass");
        assert_eq!(link.plugin, "obfs-local");
        assert_eq!(link.plugin_opts, "obfs=http");
    }

    #[test]
    fn test_outbound_spec() {
        let url = Url::parse("ss://YWVzLTEyOC1nY206dGVzdA@server:8388#node-1").unwrap();
        let spec = ShadowsocksLink::parse(&url).unwrap().outbound().unwrap();
        assert_eq!(spec.kind, "shadowsocks");
        assert_eq!(spec.tag, "node-1");
        assert_eq!(spec.options["server"], "server");
        assert_eq!(spec.options["server_port"], 8388);
        assert_eq!(spec.options["method"], "aes-128-gcm");
        assert!(spec.options.get("plugin").is_none());
    }

    #[test]
    fn test_url_round_trip() {
        let url = Url::parse("ss://YWVzLTEyOC1nY206dGVzdA@server:8388#node-1").unwrap();
        let link = ShadowsocksLink::parse(&url).unwrap();
        let rendered = link.url().unwrap();
        let reparsed = ShadowsocksLink::parse(&Url::parse(&rendered).unwrap()).unwrap();
        assert_eq!(link, reparsed);
    }

    #[test]
    fn test_missing_port() {
        let url = Url::parse("ss://YWVzLTEyOC1nY206dGVzdA@server#x").unwrap();
        assert!(ShadowsocksLink::parse(&url).is_err());
    }
}
