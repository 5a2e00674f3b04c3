//! Relay URL normalization and validation.
//!
//! Relay addresses reach Keepsake from two places: the configured working
//! set and the `write` entries of a contact list. Both are normalized here so
//! that cosmetic variants (`wss://Relay.Example.com/`) collapse to one entry
//! and addresses that cannot be public relays are never dialed.
//!
//! # Normalization Rules
//!
//! - Require a websocket scheme (`wss://` or `ws://`)
//! - Parse with `nostr::RelayUrl` (lowercases scheme and host)
//! - Remove trailing slashes
//! - Preserve ports and paths
//!
//! # Filtering Rules
//!
//! URLs are rejected if the host is:
//! - `localhost`, or a loopback / unspecified address
//! - A private, CGNAT or link-local IPv4 address
//! - An IPv6 link-local, unique local or IPv4-mapped address
//! - A `.local` (mDNS) name
//! - A `.onion` name, unless `allow_onion` is set
//!
//! Setting `allow_private` lifts the address checks (not `.onion`), which is
//! what a local test relay needs.

use nostr::RelayUrl;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Options for URL normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Allow .onion (Tor hidden service) addresses.
    pub allow_onion: bool,
    /// Allow localhost, private and link-local addresses.
    pub allow_private: bool,
}

/// Result of URL normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeResult {
    /// URL is valid and normalized.
    Ok(String),
    /// URL is syntactically invalid.
    Invalid(String),
    /// URL matches a blocklist pattern.
    Blocked(String),
}

impl NormalizeResult {
    /// Returns the normalized URL if valid.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            _ => None,
        }
    }

    /// Returns true if the URL is valid.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Normalize a relay URL.
///
/// ```ignore
/// use keepsake_sync::relay::{normalize_relay_url, NormalizeOptions};
///
/// let opts = NormalizeOptions::default();
/// assert_eq!(
///     normalize_relay_url("wss://Relay.Example.COM/", &opts).ok(),
///     Some("wss://relay.example.com".to_string())
/// );
/// assert!(!normalize_relay_url("wss://localhost:8080", &opts).is_ok());
/// ```
pub fn normalize_relay_url(url: &str, opts: &NormalizeOptions) -> NormalizeResult {
    let url = url.trim();

    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("wss://") && !lower.starts_with("ws://") {
        return NormalizeResult::Invalid("URL must start with wss:// or ws://".to_string());
    }

    let parsed = match RelayUrl::parse(url) {
        Ok(u) => u,
        Err(e) => return NormalizeResult::Invalid(format!("Invalid relay URL: {}", e)),
    };

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    if let Some(reason) = check_blocklist(&normalized, opts) {
        return NormalizeResult::Blocked(reason);
    }

    NormalizeResult::Ok(normalized)
}

/// Normalize a list of relay URLs, dropping invalid and blocked entries.
///
/// The result is deduplicated and sorted. Rejections are logged at debug.
pub fn normalize_relay_list<I, S>(urls: I, opts: &NormalizeOptions) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for url in urls {
        let url = url.as_ref();
        match normalize_relay_url(url, opts) {
            NormalizeResult::Ok(normalized) => {
                out.insert(normalized);
            }
            NormalizeResult::Invalid(reason) | NormalizeResult::Blocked(reason) => {
                tracing::debug!("Skipping relay {}: {}", url, reason);
            }
        }
    }
    out.into_iter().collect()
}

/// Check if a URL matches any blocklist pattern.
///
/// Returns `Some(reason)` if blocked, `None` if allowed.
fn check_blocklist(url: &str, opts: &NormalizeOptions) -> Option<String> {
    let host = extract_host(url);

    if host.is_empty() {
        return Some("empty host not allowed".to_string());
    }

    if !opts.allow_onion && host.ends_with(".onion") {
        return Some(".onion addresses not allowed".to_string());
    }

    if opts.allow_private {
        return None;
    }

    if host == "localhost" || host.ends_with(".localhost") {
        return Some("localhost not allowed".to_string());
    }

    if host.ends_with(".local") {
        return Some(".local addresses not allowed".to_string());
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => blocked_ipv4(ip),
        Ok(IpAddr::V6(ip)) => blocked_ipv6(ip),
        Err(_) => None,
    }
}

fn blocked_ipv4(ip: Ipv4Addr) -> Option<String> {
    let octets = ip.octets();
    let reason = if ip.is_unspecified() {
        "unspecified address (0.0.0.0)"
    } else if ip.is_loopback() {
        "loopback address"
    } else if ip.is_private() {
        "private IP"
    } else if octets[0] == 100 && (64..=127).contains(&octets[1]) {
        "CGNAT/shared address (100.64-127.x.x)"
    } else if ip.is_link_local() {
        "link-local address (169.254.x.x)"
    } else {
        return None;
    };
    Some(format!("{reason} not allowed"))
}

fn blocked_ipv6(ip: Ipv6Addr) -> Option<String> {
    let segments = ip.segments();
    let reason = if ip.is_loopback() || ip.is_unspecified() {
        "IPv6 loopback"
    } else if (segments[0] & 0xffc0) == 0xfe80 {
        "IPv6 link-local (fe80::)"
    } else if (segments[0] & 0xfe00) == 0xfc00 {
        "IPv6 unique local (fc00::/7)"
    } else if ip.to_ipv4_mapped().is_some() {
        // Could otherwise smuggle a private IPv4 past the checks above.
        "IPv4-mapped IPv6 (::ffff:)"
    } else {
        return None;
    };
    Some(format!("{reason} not allowed"))
}

/// Extract the bare host from a normalized websocket URL: no scheme, port,
/// path or IPv6 brackets.
fn extract_host(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);

    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }

    authority.split(':').next().unwrap_or(authority)
}
