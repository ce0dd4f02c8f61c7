// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOCKS4 / SOCKS5 proxy links.

use serde::{Deserialize, Serialize};
use url::Url;

use super::{escape_component, fragment_of, password_of, username_of, Link};
use crate::adapter::OutboundSpec;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocksLink {
    /// `"4"` or `"5"`.
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remarks: String,
}

#[derive(Serialize)]
struct SocksOptions<'a> {
    server: &'a str,
    server_port: u16,
    version: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    username: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    password: &'a str,
}

pub(super) fn parse(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(SocksLink::parse(u)?))
}

impl SocksLink {
    pub fn parse(u: &Url) -> Result<Self> {
        let version = match u.scheme() {
            "socks4" => "4",
            "socks5" => "5",
            _ => return Err(Error::BadLink("not a socks link".to_string())),
        };
        let port = super::required_port(u)?;
        Ok(SocksLink {
            version: version.to_string(),
            username: username_of(u)?,
            password: password_of(u)?.unwrap_or_default(),
            host: u.host_str().unwrap_or_default().to_string(),
            port,
            remarks: fragment_of(u),
        })
    }
}

impl Link for SocksLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        let options = serde_json::to_value(SocksOptions {
            server: &self.host,
            server_port: self.port,
            version: &self.version,
            username: &self.username,
            password: &self.password,
        })
        .map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(OutboundSpec {
            tag: self.remarks.clone(),
            kind: "socks".to_string(),
            options,
        })
    }

    fn url(&self) -> Result<String> {
        let mut url = format!("socks{}://", self.version);
        if !self.username.is_empty() || !self.password.is_empty() {
            url.push_str(&format!(
                "{}:{}@",
                escape_component(&self.username),
                escape_component(&self.password)
            ));
        }
        url.push_str(&format!("{}:{}", self.host, self.port));
        if !self.remarks.is_empty() {
            url.push('#');
            url.push_str(&escape_component(&self.remarks));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        let v4 = SocksLink::parse(&Url::parse("socks4://host.example:1080#a").unwrap()).unwrap();
        assert_eq!(v4.version, "4");
        let v5 = SocksLink::parse(&Url::parse("socks5://u:p@host.example:1080#b").unwrap()).unwrap();
        assert_eq!(v5.version, "5");
        assert_eq!(v5.username, "u");
        assert_eq!(v5.password, "p");
    }

    #[test]
    fn test_outbound_spec() {
        let link = SocksLink::parse(&Url::parse("socks5://host:1080#s").unwrap()).unwrap();
        let spec = link.outbound().unwrap();
        assert_eq!(spec.kind, "socks");
        assert_eq!(spec.options["version"], "5");
        assert!(spec.options.get("username").is_none());
    }

    #[test]
    fn test_round_trip() {
        let link = SocksLink::parse(&Url::parse("socks5://u:p@host:1080#tag x").unwrap()).unwrap();
        let reparsed = SocksLink::parse(&Url::parse(&link.url().unwrap()).unwrap()).unwrap();
        assert_eq!(link, reparsed);
    }
}
