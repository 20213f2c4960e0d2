//! Network classification helpers
//!
//! Internal vs external over RFC1918 plus the deployment's own CIDR ranges.

use std::net::{IpAddr, Ipv4Addr};

use vigil_core::validate::is_private_or_local;

/// A parsed IPv4 CIDR range
#[derive(Debug, Clone, Copy)]
pub struct CidrV4 {
    network: u32,
    mask: u32,
}

impl CidrV4 {
    /// Parse "a.b.c.d/len"; None for anything else
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, len) = s.trim().split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let len: u32 = len.parse().ok()?;
        if len > 32 {
            return None;
        }
        let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
        Some(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask == self.network
    }
}

/// Parse the configured internal ranges, dropping malformed entries
pub fn parse_cidrs(raw: &[String]) -> Vec<CidrV4> {
    raw.iter().filter_map(|s| CidrV4::parse(s)).collect()
}

/// Internal = RFC1918/loopback/link-local, or inside a configured range
pub fn is_internal(ip: &IpAddr, internal_cidrs: &[CidrV4]) -> bool {
    if is_private_or_local(ip) {
        return true;
    }
    match ip {
        IpAddr::V4(v4) => internal_cidrs.iter().any(|cidr| cidr.contains(*v4)),
        IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_parse_and_contains() {
        let cidr = CidrV4::parse("100.64.0.0/10").unwrap();
        assert!(cidr.contains("100.64.1.1".parse().unwrap()));
        assert!(cidr.contains("100.127.255.255".parse().unwrap()));
        assert!(!cidr.contains("100.128.0.0".parse().unwrap()));

        assert!(CidrV4::parse("not-a-cidr").is_none());
        assert!(CidrV4::parse("10.0.0.0/33").is_none());
    }

    #[test]
    fn rfc1918_is_internal_without_config() {
        assert!(is_internal(&"192.168.1.100".parse().unwrap(), &[]));
        assert!(is_internal(&"10.9.8.7".parse().unwrap(), &[]));
        assert!(!is_internal(&"8.8.8.8".parse().unwrap(), &[]));
    }

    #[test]
    fn configured_ranges_extend_internal() {
        let cidrs = parse_cidrs(&["198.18.0.0/15".to_string(), "garbage".to_string()]);
        assert_eq!(cidrs.len(), 1);
        assert!(is_internal(&"198.18.44.2".parse().unwrap(), &cidrs));
        assert!(!is_internal(&"198.20.0.1".parse().unwrap(), &cidrs));
    }
}
