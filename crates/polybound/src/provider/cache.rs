// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription cache file.
//!
//! A plain file holding the raw subscription text. The file's mtime is
//! authoritative for the snapshot's fetch time. Absence is normal.

use std::path::Path;
use std::time::SystemTime;

use super::content::{parse_file_content, FileContent};
use crate::Result;

pub(super) fn save_cache(path: &Path, content: &FileContent) -> Result<()> {
    // whole-file replace: write a sibling temp file, then rename over
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, content.raw.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Writes the cache only when the snapshot differs from what is on disk.
pub(super) fn save_cache_if_need(path: &Path, content: &FileContent) -> Result<()> {
    if content.links.is_empty() {
        return Ok(());
    }
    match load_cache(path) {
        Ok(saved) if saved.links_hash == content.links_hash => Ok(()),
        _ => save_cache(path, content),
    }
}

pub(super) fn load_cache(path: &Path) -> Result<FileContent> {
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or_else(|_| SystemTime::now());
    let raw = std::fs::read_to_string(path)?;
    Ok(parse_file_content(&raw, modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "ss://YWVzLTEyOC1nY206dGVzdA@a.example:8388#a\n";

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub.cache");
        let content = parse_file_content(BODY, SystemTime::now());
        save_cache(&path, &content).unwrap();

        let loaded = load_cache(&path).unwrap();
        assert_eq!(loaded.raw, content.raw);
        assert_eq!(loaded.links_hash, content.links_hash);
    }

    #[test]
    fn test_save_if_need_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub.cache");
        let content = parse_file_content(BODY, SystemTime::now());
        save_cache_if_need(&path, &content).unwrap();
        let first_mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

        // identical snapshot: no rewrite
        save_cache_if_need(&path, &content).unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().modified().unwrap(),
            first_mtime
        );

        // changed snapshot: rewritten
        let other = parse_file_content(
            "trojan://pw@b.example:443#b\n",
            SystemTime::now(),
        );
        save_cache_if_need(&path, &other).unwrap();
        assert_eq!(load_cache(&path).unwrap().links_hash, other.links_hash);
    }

    #[test]
    fn test_empty_snapshot_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub.cache");
        let content = parse_file_content("", SystemTime::now());
        save_cache_if_need(&path, &content).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cache(&dir.path().join("absent")).is_err());
    }
}
