// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription document parsing.

use std::time::SystemTime;

use sha2::{Digest, Sha256};
use url::Url;

use super::info::{parse_info, ProviderInfo};
use crate::link::base64_decode_or_original;

/// A parsed subscription snapshot. Snapshots with equal `links_hash` carry
/// the same membership.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub info: Option<ProviderInfo>,
    /// Canonicalized links, newline-joined.
    pub links: String,
    /// Hex SHA-256 over `links`.
    pub links_hash: String,
    /// The document as fetched, before base64 unwrapping.
    pub raw: String,
    pub updated: SystemTime,
}

/// Parses a subscription document.
///
/// The body may be base64-wrapped (standard or URL alphabet, padding
/// optional). Canonical links are the trimmed lines that parse as URLs
/// with a scheme; everything else is dropped.
pub fn parse_file_content(content: &str, updated: SystemTime) -> FileContent {
    let info = parse_info(content).ok();
    let decoded = base64_decode_or_original(content);
    let mut links = Vec::new();
    for line in decoded.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match Url::parse(line) {
            Ok(url) if !url.scheme().is_empty() => links.push(line.to_string()),
            _ => continue,
        }
    }
    let links = links.join("\n");
    let links_hash = hex::encode(Sha256::digest(links.as_bytes()));
    FileContent {
        info,
        links,
        links_hash,
        raw: content.to_string(),
        updated,
    }
}
