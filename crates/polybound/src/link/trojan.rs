// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trojan links.
//!
//! `trojan://password@domain:port?allowinsecure=value&sni=value#remarks`

use serde::{Deserialize, Serialize};
use url::Url;

use super::{escape_component, fragment_of, username_of, Link, TlsOptions};
use crate::adapter::OutboundSpec;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrojanLink {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remarks: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_insecure: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sni: String,
}

#[derive(Serialize)]
struct TrojanOptions<'a> {
    server: &'a str,
    server_port: u16,
    password: &'a str,
    tls: TlsOptions,
}

pub(super) fn parse(u: &Url) -> Result<Box<dyn Link>> {
    Ok(Box::new(TrojanLink::parse(u)?))
}

impl TrojanLink {
    pub fn parse(u: &Url) -> Result<Self> {
        if u.scheme() != "trojan" {
            return Err(Error::BadLink("not a trojan link".to_string()));
        }
        let port = super::required_port(u)?;
        let mut link = TrojanLink {
            host: u.host_str().unwrap_or_default().to_string(),
            port,
            remarks: fragment_of(u),
            password: username_of(u)?,
            ..Default::default()
        };
        for (key, value) in u.query_pairs() {
            match key.to_ascii_lowercase().as_str() {
                "allowinsecure" => link.allow_insecure = value != "0",
                "sni" => link.sni = value.to_string(),
                _ => {}
            }
        }
        Ok(link)
    }
}

impl Link for TrojanLink {
    fn outbound(&self) -> Result<OutboundSpec> {
        let sni = if self.sni.is_empty() {
            self.host.clone()
        } else {
            self.sni.clone()
        };
        let options = serde_json::to_value(TrojanOptions {
            server: &self.host,
            server_port: self.port,
            password: &self.password,
            tls: TlsOptions {
                enabled: true,
                server_name: sni,
                insecure: self.allow_insecure,
                ..Default::default()
            },
        })
        .map_err(|err| Error::BadLink(err.to_string()))?;
        Ok(OutboundSpec {
            tag: self.remarks.clone(),
            kind: "trojan".to_string(),
            options,
        })
    }

    fn url(&self) -> Result<String> {
        let mut url = format!(
            "trojan://{}@{}:{}",
            escape_component(&self.password),
            self.host,
            self.port
        );
        let mut query = Vec::new();
        if self.allow_insecure {
            query.push("allowinsecure=1".to_string());
        }
        if !self.sni.is_empty() {
            query.push(format!("sni={}", escape_component(&self.sni)));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        if !self.remarks.is_empty() {
            url.push('#');
            url.push_str(&escape_component(&self.remarks));
        }
        Ok(url)
    }
}
