//! SSRF gate for externally supplied URLs.
//!
//! Every URL that will be fetched (for extraction, for the teaching sandbox,
//! or as a redirect hop) must pass [`classify`] first. The gate is a pure
//! function: it never resolves DNS and holds no state.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use ipnet::{Ipv4Net, Ipv6Net};
use url::{Host, Url};

use crate::types::{PluckError, PluckResult};

/// Hostnames that are never fetchable, compared case-insensitively.
const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "::1",
    "metadata.google.internal",
    "169.254.169.254",
];

static BLOCKED_V4: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "224.0.0.0/4", // multicast 224-239
        "240.0.0.0/4", // reserved 240-255
    ]
    .iter()
    .map(|cidr| cidr.parse().expect("blocked v4 cidr is valid"))
    .collect()
});

static BLOCKED_V6: LazyLock<Vec<Ipv6Net>> = LazyLock::new(|| {
    [
        "::/128",
        "::1/128",
        "fe80::/10", // link-local
        "fc00::/7",  // unique-local (fc.. and fd..)
    ]
    .iter()
    .map(|cidr| cidr.parse().expect("blocked v6 cidr is valid"))
    .collect()
});

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Unparseable(String),
    Scheme(String),
    MissingHost,
    BlockedHost(String),
    PrivateAddress(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable(e) => write!(f, "URL could not be parsed: {e}"),
            Self::Scheme(s) => write!(f, "scheme '{s}' is not allowed (http/https only)"),
            Self::MissingHost => f.write_str("URL has no host"),
            Self::BlockedHost(h) => write!(f, "host '{h}' is blocked"),
            Self::PrivateAddress(ip) => write!(f, "address {ip} is in a private or reserved range"),
        }
    }
}

/// Result of gating a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlVerdict {
    Allowed(Url),
    Rejected(RejectReason),
}

impl UrlVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Convert into a `Result`, mapping rejections onto input errors.
    pub fn into_result(self) -> PluckResult<Url> {
        match self {
            Self::Allowed(url) => Ok(url),
            Self::Rejected(RejectReason::Unparseable(e)) => Err(PluckError::InvalidUrl(e)),
            Self::Rejected(reason) => Err(PluckError::DisallowedUrl(reason.to_string())),
        }
    }
}

/// Classify a raw URL string as fetchable or not.
pub fn classify(raw: &str) -> UrlVerdict {
    match Url::parse(raw.trim()) {
        Ok(url) => classify_url(url),
        Err(e) => UrlVerdict::Rejected(RejectReason::Unparseable(e.to_string())),
    }
}

/// Classify an already parsed URL (used for redirect hops).
pub fn classify_url(url: Url) -> UrlVerdict {
    match check(&url) {
        Ok(()) => UrlVerdict::Allowed(url),
        Err(reason) => {
            tracing::warn!(url = %url, %reason, "rejected url");
            UrlVerdict::Rejected(reason)
        }
    }
}

fn check(url: &Url) -> Result<(), RejectReason> {
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(RejectReason::Scheme(scheme.to_string()));
    }

    let host_str = url.host_str().ok_or(RejectReason::MissingHost)?;
    let bare = host_str
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if BLOCKED_HOSTS.contains(&bare.as_str()) {
        return Err(RejectReason::BlockedHost(bare));
    }

    match url.host() {
        Some(Host::Ipv4(ip)) => check_v4(ip),
        Some(Host::Ipv6(ip)) => check_v6(ip),
        Some(Host::Domain(_)) => Ok(()),
        None => Err(RejectReason::MissingHost),
    }
}

fn check_v4(ip: Ipv4Addr) -> Result<(), RejectReason> {
    if BLOCKED_V4.iter().any(|net| net.contains(&ip)) {
        return Err(RejectReason::PrivateAddress(ip.to_string()));
    }
    Ok(())
}

fn check_v6(ip: Ipv6Addr) -> Result<(), RejectReason> {
    // Both `::ffff:a.b.c.d` (mapped) and `::a.b.c.d` (compatible) embed an
    // IPv4 address.
    if let Some(v4) = ip.to_ipv4() {
        return check_v4(v4).map_err(|_| RejectReason::PrivateAddress(ip.to_string()));
    }
    if BLOCKED_V6.iter().any(|net| net.contains(&ip)) {
        return Err(RejectReason::PrivateAddress(ip.to_string()));
    }
    Ok(())
}

/// Normalize a hostname for mapping lookups: lowercase, no trailing dot,
/// no leading `www.`.
pub fn normalize_domain(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lower,
    }
}

/// Normalized domain of a URL, if it has a host.
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str().map(normalize_domain)
}

/// Path used to match mapping path patterns; always starts with `/`.
pub fn path_of(url: &Url) -> String {
    match url.path() {
        "" => "/".to_string(),
        p => p.to_string(),
    }
}

/// Validate a teaching-submission domain: a bare hostname, no scheme,
/// no path, no port. Returns the normalized form.
pub fn validate_bare_domain(domain: &str) -> PluckResult<String> {
    let trimmed = domain.trim();
    if trimmed.is_empty() {
        return Err(PluckError::InvalidDomain("domain is empty".into()));
    }
    if trimmed.contains("://") {
        return Err(PluckError::InvalidDomain(format!(
            "'{trimmed}' contains a scheme; send a bare hostname"
        )));
    }
    if trimmed
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '?' | '#' | '@'))
    {
        return Err(PluckError::InvalidDomain(format!(
            "'{trimmed}' is not a bare hostname"
        )));
    }
    let normalized = normalize_domain(trimmed);
    if Host::parse(&normalized).is_err() {
        return Err(PluckError::InvalidDomain(format!(
            "'{trimmed}' is not a valid hostname"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rejected(raw: &str) -> bool {
        !classify(raw).is_allowed()
    }

    #[test]
    fn test_metadata_endpoint_rejected() {
        assert!(rejected("http://169.254.169.254/latest/meta-data"));
        assert!(rejected("http://metadata.google.internal/computeMetadata/v1"));
        assert!(rejected("http://METADATA.google.internal/"));
    }

    #[test]
    fn test_public_shop_allowed() {
        match classify("https://shop.example.com/item/1") {
            UrlVerdict::Allowed(url) => assert_eq!(url.host_str(), Some("shop.example.com")),
            other => panic!("expected allowed, got {other:?}"),
        }
    }

    #[test]
    fn test_mapped_loopback_rejected() {
        assert!(rejected("http://[::ffff:127.0.0.1]"));
        assert!(rejected("http://[::ffff:10.1.2.3]/"));
        assert!(!rejected("http://[::ffff:8.8.8.8]/"));
        assert!(rejected("http://[::127.0.0.1]/"));
        assert!(rejected("http://[::169.254.169.254]/"));
        assert!(rejected("http://[::]/"));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert_eq!(
            classify("ftp://example.com"),
            UrlVerdict::Rejected(RejectReason::Scheme("ftp".into()))
        );
        assert!(rejected("file:///etc/passwd"));
        assert!(rejected("javascript:alert(1)"));
    }

    #[test]
    fn test_private_ranges_rejected() {
        for raw in [
            "http://10.0.0.1/",
            "http://172.16.5.4/",
            "http://172.31.255.255/",
            "http://192.168.1.1/",
            "http://127.8.8.8/",
            "http://0.1.2.3/",
            "http://224.0.0.1/",
            "http://239.255.255.250/",
            "http://250.1.1.1/",
            "http://localhost:8080/",
            "http://LOCALHOST/",
            "http://[::1]/",
            "http://[fe80::1]/",
            "http://[fc00::1]/",
            "http://[fd12:3456::1]/",
        ] {
            assert!(rejected(raw), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_neighbouring_public_ranges_allowed() {
        for raw in ["http://172.32.0.1/", "http://11.0.0.1/", "http://[2001:db8::1]/"] {
            assert!(!rejected(raw), "{raw} should be allowed");
        }
    }

    #[test]
    fn test_out_of_range_octet_rejected() {
        assert!(matches!(
            classify("http://256.1.1.1/"),
            UrlVerdict::Rejected(RejectReason::Unparseable(_))
        ));
    }

    #[test]
    fn test_numeric_host_forms_are_normalized_before_checking() {
        // 2130706433 == 127.0.0.1
        assert!(rejected("http://2130706433/"));
        assert!(rejected("http://0x7f.0.0.1/"));
    }

    #[test]
    fn test_domains_starting_with_fd_are_not_ipv6() {
        assert!(!rejected("https://fdshop.example/"));
        assert!(!rejected("https://fcbarcelona.com/"));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("WWW.Example.COM"), "example.com");
        assert_eq!(normalize_domain("shop.example.com."), "shop.example.com");
        assert_eq!(normalize_domain("www."), "www.");
    }

    #[test]
    fn test_validate_bare_domain() {
        assert_eq!(validate_bare_domain("www.Shop.com").unwrap(), "shop.com");
        assert!(validate_bare_domain("https://shop.com").is_err());
        assert!(validate_bare_domain("shop.com/path").is_err());
        assert!(validate_bare_domain("").is_err());
    }

    proptest! {
        #[test]
        fn prop_ten_slash_eight_always_rejected(b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let raw = format!("http://10.{b}.{c}.{d}/");
            prop_assert!(rejected(&raw));
        }

        #[test]
        fn prop_embedded_loopback_always_rejected(b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let compat = format!("http://[::127.{b}.{c}.{d}]/");
            let mapped = format!("http://[::ffff:127.{b}.{c}.{d}]/");
            prop_assert!(rejected(&compat));
            prop_assert!(rejected(&mapped));
        }

        #[test]
        fn prop_gate_never_panics(raw in ".{0,64}") {
            let _ = classify(&raw);
        }
    }
}
