// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error type.

use std::fmt;

/// Convenience alias used by all fallible APIs in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by polybound operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (fatal at construction, no retry)
    // ========================================================================
    /// Generic configuration error with a human-readable reason.
    Config(String),
    /// Unknown balancing objective name.
    UnknownObjective(String),
    /// Unknown pick strategy name.
    UnknownStrategy(String),
    /// Include/exclude filter failed to compile.
    Regex(regex::Error),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// No outbound registered under this tag.
    OutboundNotFound(String),
    /// No provider registered under this tag.
    ProviderNotFound(String),
    /// A group has nothing to dial through.
    NoOutboundAvailable(String),
    /// Group resolution exceeded the nesting bound (cycle or too deep).
    GroupNesting,

    // ========================================================================
    // Network Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// HTTP request failed below the status-code level.
    Http(String),
    /// HTTP request completed with a non-success status.
    UnexpectedStatus(u16),
    /// TLS setup or handshake failed.
    Tls(String),
    /// Operation exceeded its deadline.
    Timeout,
    /// Operation was canceled by its owner; not a real failure.
    Canceled,

    // ========================================================================
    // Parse Errors
    // ========================================================================
    /// No link parser registered for this URL scheme.
    UnknownScheme(String),
    /// A link had a recognized scheme but an unusable payload.
    BadLink(String),
    /// Binary envelope or subscription payload failed to decode.
    Decode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(reason) => write!(f, "invalid configuration: {}", reason),
            Error::UnknownObjective(name) => write!(f, "unknown objective: {}", name),
            Error::UnknownStrategy(name) => write!(f, "unknown strategy: {}", name),
            Error::Regex(err) => write!(f, "invalid filter expression: {}", err),
            Error::OutboundNotFound(tag) => write!(f, "outbound not found: {}", tag),
            Error::ProviderNotFound(tag) => write!(f, "provider [{}] not found", tag),
            Error::NoOutboundAvailable(reason) => write!(f, "no outbound available, {}", reason),
            Error::GroupNesting => write!(f, "too deep or loop nesting of outbound groups"),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Http(reason) => write!(f, "http error: {}", reason),
            Error::UnexpectedStatus(code) => write!(f, "unexpected status code: {}", code),
            Error::Tls(reason) => write!(f, "tls error: {}", reason),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Canceled => write!(f, "operation canceled"),
            Error::UnknownScheme(scheme) => write!(f, "no parser for scheme: {}", scheme),
            Error::BadLink(reason) => write!(f, "bad link: {}", reason),
            Error::Decode(reason) => write!(f, "decode error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Regex(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Regex(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::OutboundNotFound("proxy-a".into()).to_string(),
            "outbound not found: proxy-a"
        );
        assert_eq!(
            Error::GroupNesting.to_string(),
            "too deep or loop nesting of outbound groups"
        );
        assert_eq!(Error::UnexpectedStatus(503).to_string(), "unexpected status code: 503");
    }

    #[test]
    fn test_io_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
