//! Observable validation
//!
//! Shared by the ingestor (request validation) and the normalizer (IOC
//! extraction). Hashes must be exact-length hex, timestamps must fall inside
//! the accepted window, URLs get a rough RFC-3986 match.

use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};

use crate::model::IocType;

/// Oldest accepted alert timestamp: 30 days
pub const MAX_ALERT_AGE_DAYS: i64 = 30;
/// Tolerated clock skew into the future: 5 minutes
pub const MAX_CLOCK_SKEW_MINS: i64 = 5;

/// Classify a file hash by length and hex charset
pub fn hash_type(hash: &str) -> Option<IocType> {
    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hash.len() {
        32 => Some(IocType::Md5),
        40 => Some(IocType::Sha1),
        64 => Some(IocType::Sha256),
        _ => None,
    }
}

pub fn is_valid_file_hash(hash: &str) -> bool {
    hash_type(hash).is_some()
}

/// Rough RFC-3986 shape: scheme://host with no whitespace
pub fn is_valid_url(url: &str) -> bool {
    if url.len() > 2048 || url.contains(char::is_whitespace) {
        return false;
    }
    let Some((scheme, rest)) = url.split_once("://") else {
        return false;
    };
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return false;
    }
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty()
}

/// Hostname shape: dot-separated labels, alphanumeric with hyphens, TLD of
/// letters only. Rejects bare IPs (those classify as Ip).
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.len() > 253 || domain.parse::<IpAddr>().is_ok() {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let tld_ok = labels
        .last()
        .is_some_and(|t| t.len() >= 2 && t.chars().all(|c| c.is_ascii_alphabetic()));
    tld_ok
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Check an alert timestamp against the accepted window
pub fn timestamp_in_window(ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let oldest = now - Duration::days(MAX_ALERT_AGE_DAYS);
    let newest = now + Duration::minutes(MAX_CLOCK_SKEW_MINS);
    ts >= oldest && ts <= newest
}

/// RFC1918 / loopback / link-local / unspecified classification.
///
/// Used both for internal-vs-external tagging in enrichment and to drop
/// non-routable IPs during free-text IOC extraction.
pub fn is_private_or_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// /24 subnet for an IPv4 address, None for IPv6
pub fn subnet_24(ip: &IpAddr) -> Option<String> {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            Some(format!("{}.{}.{}.0/24", o[0], o[1], o[2]))
        }
        IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_lengths() {
        assert_eq!(
            hash_type("44d88612fea8a8f36de82e1278abb02f"),
            Some(IocType::Md5)
        );
        assert_eq!(
            hash_type("3395856ce81f2b7382dee72602f798b642f14140"),
            Some(IocType::Sha1)
        );
        assert_eq!(
            hash_type("275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f"),
            Some(IocType::Sha256)
        );
        assert_eq!(hash_type("abc"), None);
        assert_eq!(hash_type("zz d88612fea8a8f36de82e1278abb02f"), None);
    }

    #[test]
    fn url_shapes() {
        assert!(is_valid_url("https://evil.example.com/payload?id=1"));
        assert!(is_valid_url("hxxp+tls://host"));
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url("://missing-scheme"));
        assert!(!is_valid_url("https://"));
    }

    #[test]
    fn domain_shapes() {
        assert!(is_valid_domain("evil.example.com"));
        assert!(is_valid_domain("a-b.co"));
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("8.8.8.8"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("example.123"));
    }

    #[test]
    fn timestamp_window_boundaries() {
        let now = Utc::now();
        assert!(timestamp_in_window(now, now));
        assert!(timestamp_in_window(now + Duration::minutes(5), now));
        assert!(!timestamp_in_window(
            now + Duration::minutes(5) + Duration::seconds(1),
            now
        ));
        assert!(timestamp_in_window(now - Duration::days(30), now));
        assert!(!timestamp_in_window(
            now - Duration::days(30) - Duration::seconds(1),
            now
        ));
    }

    #[test]
    fn private_ranges() {
        assert!(is_private_or_local(&"192.168.1.100".parse().unwrap()));
        assert!(is_private_or_local(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_or_local(&"255.255.255.255".parse().unwrap()));
        assert!(is_private_or_local(&"::1".parse().unwrap()));
        assert!(!is_private_or_local(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn subnet_formatting() {
        assert_eq!(
            subnet_24(&"203.0.113.77".parse().unwrap()),
            Some("203.0.113.0/24".to_string())
        );
        assert_eq!(subnet_24(&"2001:db8::1".parse().unwrap()), None);
    }
}
