// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription link parsing.
//!
//! A [`Parser`] turns one URL into a [`Link`], which can render itself back
//! to a canonical URL and produce the [`OutboundSpec`] the outbound
//! registry constructs endpoints from. Several parsers may claim the same
//! scheme (the vmess ecosystem alone has three wire shapes); they are tried
//! in registration order and the first success wins.

mod http;
mod hysteria;
mod hysteria2;
mod shadowsocks;
mod socks;
mod trojan;
mod vless;
mod vmess;

pub use http::HttpLink;
pub use hysteria::HysteriaLink;
pub use hysteria2::Hysteria2Link;
pub use shadowsocks::ShadowsocksLink;
pub use socks::SocksLink;
pub use trojan::TrojanLink;
pub use vless::VlessLink;
pub use vmess::{Vmess, VmessNgLink, VmessRocketLink};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::{DecodePaddingMode, Engine};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::adapter::OutboundSpec;
use crate::{Error, Result};

/// A parsed subscription link.
pub trait Link: Send + Sync {
    /// Equivalent outbound spec of the link.
    fn outbound(&self) -> Result<OutboundSpec>;
    /// Canonical URL representation of the link.
    fn url(&self) -> Result<String>;
}

/// A link parser for one or more URL schemes.
pub struct Parser {
    pub name: &'static str,
    pub schemes: &'static [&'static str],
    pub parse: fn(&Url) -> Result<Box<dyn Link>>,
}

/// All registered parsers, in priority order.
pub fn parsers() -> &'static [Parser] {
    static PARSERS: &[Parser] = &[
        Parser {
            name: "Shadowsocks",
            schemes: &["ss"],
            parse: shadowsocks::parse,
        },
        Parser {
            name: "V2RayNG",
            schemes: &["vmess"],
            parse: vmess::parse_ng,
        },
        Parser {
            name: "ShadowRocket",
            schemes: &["vmess"],
            parse: vmess::parse_rocket,
        },
        Parser {
            name: "Xray",
            schemes: &["vless"],
            parse: vless::parse,
        },
        Parser {
            name: "Trojan",
            schemes: &["trojan"],
            parse: trojan::parse,
        },
        Parser {
            name: "Hysteria",
            schemes: &["hysteria"],
            parse: hysteria::parse,
        },
        Parser {
            name: "Hysteria2",
            schemes: &["hysteria2", "hy2"],
            parse: hysteria2::parse,
        },
        Parser {
            name: "Socks",
            schemes: &["socks4", "socks5"],
            parse: socks::parse,
        },
        Parser {
            name: "HTTP",
            schemes: &["http", "https"],
            parse: http::parse,
        },
    ];
    PARSERS
}

/// Parses one link URL, trying every parser registered for its scheme.
pub fn parse(u: &Url) -> Result<Box<dyn Link>> {
    let scheme = u.scheme();
    let mut tried = 0;
    let mut errors = Vec::new();
    for parser in parsers() {
        if !parser.schemes.contains(&scheme) {
            continue;
        }
        tried += 1;
        match (parser.parse)(u) {
            Ok(link) => return Ok(link),
            Err(err) => errors.push(format!("[{}] {}", parser.name, err)),
        }
    }
    if tried == 0 {
        return Err(Error::UnknownScheme(scheme.to_string()));
    }
    Err(Error::BadLink(errors.join("; ")))
}

/// Parses a newline-delimited link collection. Returns the parsed links and
/// the zero-based line index of every failed line.
pub fn parse_collection(content: &str) -> (Vec<Box<dyn Link>>, Vec<(usize, Error)>) {
    let mut links = Vec::new();
    let mut errors = Vec::new();
    for (index, line) in content.split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let url = match Url::parse(line) {
            Ok(url) => url,
            Err(_) => continue,
        };
        match parse(&url) {
            Ok(link) => links.push(link),
            Err(err) => errors.push((index, err)),
        }
    }
    (links, errors)
}

const STD_LOOSE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const URL_LOOSE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes standard or URL-alphabet base64, padding optional.
pub(crate) fn base64_decode(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    STD_LOOSE
        .decode(s)
        .or_else(|_| URL_LOOSE.decode(s))
        .map_err(|err| Error::Decode(format!("base64: {}", err)))
}

pub(crate) fn base64_encode(b: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(b)
}

/// Decodes when the payload is base64 text, otherwise returns the input.
pub(crate) fn base64_decode_or_original(s: &str) -> String {
    match base64_decode(s) {
        Ok(decoded) => match String::from_utf8(decoded) {
            Ok(text) => text,
            Err(_) => s.to_string(),
        },
        Err(_) => s.to_string(),
    }
}

/// TLS settings shared by the option payloads of several links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsOptions {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,
}

/// V2Ray-style transport settings shared by vmess/vless payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

pub(crate) const TRANSPORT_WEBSOCKET: &str = "ws";
pub(crate) const TRANSPORT_HTTP: &str = "http";
pub(crate) const TRANSPORT_QUIC: &str = "quic";
pub(crate) const TRANSPORT_GRPC: &str = "grpc";

/// Port of a URL, required.
pub(crate) fn required_port(u: &Url) -> Result<u16> {
    u.port()
        .ok_or_else(|| Error::BadLink("invalid port".to_string()))
}

fn unescape(s: &str, plus_as_space: bool) -> Result<String> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = s
                    .get(i + 1..i + 3)
                    .ok_or_else(|| Error::BadLink("truncated percent escape".to_string()))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| Error::BadLink("invalid percent escape".to_string()))?;
                out.push(byte);
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::BadLink("escaped text is not utf-8".to_string()))
}

/// Resolves percent escapes; `+` stays literal (path/fragment semantics).
pub(crate) fn percent_decode(s: &str) -> Result<String> {
    unescape(s, false)
}

/// Resolves percent escapes and `+` as space (query semantics).
pub(crate) fn query_unescape(s: &str) -> Result<String> {
    unescape(s, true)
}

/// Conservative component encoder: everything outside the unreserved set
/// becomes a percent escape, so round trips are alphabet-independent.
pub(crate) fn escape_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Decoded fragment of a URL; the raw text is kept when escapes are broken.
pub(crate) fn fragment_of(u: &Url) -> String {
    let raw = u.fragment().unwrap_or_default();
    percent_decode(raw).unwrap_or_else(|_| raw.to_string())
}

/// Decoded username of a URL.
pub(crate) fn username_of(u: &Url) -> Result<String> {
    percent_decode(u.username())
}

/// Decoded password of a URL, when present.
pub(crate) fn password_of(u: &Url) -> Result<Option<String>> {
    match u.password() {
        Some(raw) => Ok(Some(percent_decode(raw)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_loose_alphabets() {
        let want = b"subscription text";
        let std = base64_encode(want);
        let unpadded = std.trim_end_matches('=').to_string();
        assert_eq!(base64_decode(&std).unwrap(), want);
        assert_eq!(base64_decode(&unpadded).unwrap(), want);

        let url_alphabet = std.replace('+', "-").replace('/', "_");
        assert_eq!(base64_decode(&url_alphabet).unwrap(), want);
    }

    #[test]
    fn test_base64_or_original_keeps_plain_text() {
        // not valid base64: returned untouched
        let plain = "ss://YWVzLTEyOC1nY206dGVzdA==@host:8388#tag";
        assert_eq!(base64_decode_or_original(plain), plain);
    }

    #[test]
    fn test_unknown_scheme() {
        let url = Url::parse("warp://example.com:1/").unwrap();
        assert!(matches!(parse(&url), Err(Error::UnknownScheme(_))));
    }

    #[test]
    fn test_parse_collection_skips_non_urls() {
        let content = "\n# comment line\nss://YWVzLTEyOC1nY206dGVzdA==@host:8388#a\n\n";
        let (links, errors) = parse_collection(content);
        assert_eq!(links.len(), 1);
        // "# comment line" does not parse as a URL and is silently skipped
        assert!(errors.is_empty());
    }

    #[test]
    fn test_parse_collection_reports_line_index() {
        let content = "ss://YWVzLTEyOC1nY206dGVzdA==@host:8388#a\ntrojan://pass@host\n";
        let (links, errors) = parse_collection(content);
        assert_eq!(links.len(), 1);
        assert_eq!(errors.len(), 1);
        // the trojan line misses its port
        assert_eq!(errors[0].0, 1);
    }
}
