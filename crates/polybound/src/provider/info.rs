// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription quota header.
//!
//! Many subscription services prepend a Shadowrocket-style status line:
//!
//! ```text
//! STATUS=🚀↑:0.53GB,↓:14.07GB,TOT:160GB💡Expires:2023-12-05
//! ```

use serde::{Deserialize, Serialize};

use crate::link::base64_decode_or_original;
use crate::{Error, Result};

/// Quota information reported by a subscription source, in bytes and unix
/// seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(rename = "Download")]
    pub download: u64,
    #[serde(rename = "Upload")]
    pub upload: u64,
    #[serde(rename = "Total")]
    pub total: u64,
    #[serde(rename = "Expire")]
    pub expire: i64,
}

/// Parses the quota header from a subscription document.
pub fn parse_info(content: &str) -> Result<ProviderInfo> {
    parse_shadowrocket(content)
}

fn parse_shadowrocket(content: &str) -> Result<ProviderInfo> {
    let content = base64_decode_or_original(content);
    let mut lines = content.splitn(2, '\n');
    let line = lines.next().unwrap_or_default();
    if lines.next().is_none() {
        return Err(Error::Decode("invalid content".to_string()));
    }
    // the emoji icons double as separators
    let line = line.trim().replace('🚀', ",").replace('💡', ",");
    let rest = line
        .strip_prefix("STATUS=,")
        .ok_or_else(|| Error::Decode("invalid content".to_string()))?;
    let mut info = ProviderInfo::default();
    for section in rest.split(',') {
        let mut parts = section.splitn(2, ':');
        let key = parts.next().unwrap_or_default().trim();
        let value = match parts.next() {
            Some(value) => value.trim(),
            None => continue,
        };
        match key {
            "↑" => info.upload = parse_size(value),
            "↓" => info.download = parse_size(value),
            "TOT" => info.total = parse_size(value),
            "Expires" => info.expire = parse_expire(value),
            _ => {}
        }
    }
    Ok(info)
}

/// Parses `0.53GB` style sizes into bytes. Failures yield zero.
fn parse_size(size: &str) -> u64 {
    let split = size
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(size.len());
    let (number, unit) = size.split_at(split);
    let value: f64 = match number.parse() {
        Ok(value) => value,
        Err(_) => return 0,
    };
    let scale: u64 = match unit {
        "GB" => 1024 * 1024 * 1024,
        "MB" => 1024 * 1024,
        "KB" => 1024,
        _ => return 0,
    };
    (value * scale as f64) as u64
}

/// Parses `2023-12-05` into unix seconds of midnight UTC. Failures yield
/// zero.
fn parse_expire(expire: &str) -> i64 {
    let mut parts = expire.splitn(3, '-');
    let (year, month, day) = match (parts.next(), parts.next(), parts.next()) {
        (Some(y), Some(m), Some(d)) => (y, m, d),
        _ => return 0,
    };
    let (year, month, day) = match (year.parse(), month.parse(), day.parse()) {
        (Ok(y), Ok(m), Ok(d)) => (y, m, d),
        _ => return 0,
    };
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return 0;
    }
    days_from_civil(year, month, day) * 86_400
}

/// Days from 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let month_shifted = if month > 2 { month - 3 } else { month + 9 } as i64;
    let day_of_year = (153 * month_shifted + 2) / 5 + day as i64 - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let content = "STATUS=🚀↑:0.53GB,↓:14.07GB,TOT:160GB💡Expires:2023-12-05\nss://link\n";
        let info = parse_info(content).unwrap();
        assert_eq!(info.upload, (0.53 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert_eq!(info.download, (14.07 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert_eq!(info.total, 160 * 1024 * 1024 * 1024);
        // 2023-12-05T00:00:00Z
        assert_eq!(info.expire, 1_701_734_400);
    }

    #[test]
    fn test_not_a_header() {
        assert!(parse_info("ss://link\nss://other\n").is_err());
        assert!(parse_info("just one line").is_err());
    }

    #[test]
    fn test_bad_fields_zero_without_failing() {
        let content = "STATUS=🚀↑:whoops,↓:1MB,TOT:oops💡Expires:not-a-date\nss://x\n";
        let info = parse_info(content).unwrap();
        assert_eq!(info.upload, 0);
        assert_eq!(info.download, 1024 * 1024);
        assert_eq!(info.total, 0);
        assert_eq!(info.expire, 0);
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("1KB"), 1024);
        assert_eq!(parse_size("2MB"), 2 * 1024 * 1024);
        assert_eq!(parse_size("1.5GB"), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert_eq!(parse_size("12TB"), 0);
        assert_eq!(parse_size(""), 0);
    }

    #[test]
    fn test_days_from_civil() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2024, 1, 1), 19_723);
        assert_eq!(days_from_civil(1969, 12, 31), -1);
    }
}
