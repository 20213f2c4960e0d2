//! IOC extraction
//!
//! Scans free text and typed fields for IPs, hashes, URLs, and domains.
//! Free-text private/loopback IPs are noise and get dropped; typed
//! observables are kept as-is because the source asserted them.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;

use vigil_core::model::{Alert, Ioc, IocType};
use vigil_core::validate::{hash_type, is_private_or_local, is_valid_domain, is_valid_url};

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap())
}

fn ipv6_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").unwrap())
}

fn hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-fA-F0-9]{32}(?:[a-fA-F0-9]{8})?(?:[a-fA-F0-9]{24})?\b").unwrap())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\bhttps?://[^\s"'<>]+"#).unwrap())
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}\b").unwrap()
    })
}

/// Extract IOCs from one free-text blob
pub fn extract_from_text(text: &str, out: &mut HashSet<Ioc>) {
    for m in ipv4_re().find_iter(text) {
        if let Ok(ip) = m.as_str().parse::<IpAddr>() {
            if !is_private_or_local(&ip) {
                out.insert(Ioc::new(m.as_str(), IocType::Ip));
            }
        }
    }
    for m in ipv6_re().find_iter(text) {
        if let Ok(ip) = m.as_str().parse::<IpAddr>() {
            if !is_private_or_local(&ip) {
                out.insert(Ioc::new(ip.to_string(), IocType::Ip));
            }
        }
    }
    for m in hash_re().find_iter(text) {
        if let Some(ioc_type) = hash_type(m.as_str()) {
            out.insert(Ioc::new(m.as_str().to_lowercase(), ioc_type));
        }
    }
    for m in url_re().find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ')', ']']);
        if is_valid_url(url) {
            out.insert(Ioc::new(url, IocType::Url));
        }
    }
    for m in domain_re().find_iter(text) {
        // Path segments ("…/login.php") are not domains; URL hosts after
        // "//" are.
        let before = &text[..m.start()];
        if before.ends_with('/') && !before.ends_with("//") {
            continue;
        }
        let candidate = m.as_str();
        if is_valid_domain(candidate) {
            out.insert(Ioc::new(candidate.to_lowercase(), IocType::Domain));
        }
    }
}

/// All IOCs on an alert: typed observables plus free-text scan over the
/// description and the raw payload. Deduplicated within the alert.
pub fn extract(alert: &Alert) -> Vec<Ioc> {
    let mut set = HashSet::new();

    // Typed fields are source-asserted; keep them even when private
    if let Some(ip) = alert.source_ip {
        set.insert(Ioc::new(ip.to_string(), IocType::Ip));
    }
    if let Some(ip) = alert.target_ip {
        set.insert(Ioc::new(ip.to_string(), IocType::Ip));
    }
    if let Some(hash) = &alert.file_hash {
        if let Some(ioc_type) = hash_type(hash) {
            set.insert(Ioc::new(hash.to_lowercase(), ioc_type));
        }
    }
    if let Some(url) = &alert.url {
        if is_valid_url(url) {
            set.insert(Ioc::new(url.clone(), IocType::Url));
        }
    }

    extract_from_text(&alert.description, &mut set);
    if let Ok(raw_text) = serde_json::to_string(&alert.raw_payload) {
        extract_from_text(&raw_text, &mut set);
    }

    // URL hosts double as domain IOCs only when they came from text; the
    // domain regex already caught those. Drop domains that shadow a URL host
    // we know about? Keeping both: TI sources index them separately.
    let mut iocs: Vec<Ioc> = set.into_iter().collect();
    iocs.sort_by(|a, b| (a.ioc_type.as_str(), &a.value).cmp(&(b.ioc_type.as_str(), &b.value)));
    iocs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_core::model::{AlertStatus, AlertType, Severity};

    fn alert_with(description: &str) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            alert_id: "A-1".to_string(),
            alert_type: AlertType::Malware,
            severity: Severity::High,
            status: AlertStatus::New,
            description: description.to_string(),
            source: "generic".to_string(),
            timestamp: Utc::now(),
            source_ip: None,
            target_ip: None,
            file_hash: None,
            url: None,
            asset_id: None,
            user_id: None,
            process_name: None,
            raw_payload: serde_json::Value::Null,
            fingerprint: None,
            risk_score: None,
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn extracts_public_ip_and_hash_from_text() {
        let iocs = extract(&alert_with(
            "Beacon to 203.0.113.55 dropped 44d88612fea8a8f36de82e1278abb02f",
        ));
        assert!(iocs.contains(&Ioc::new("203.0.113.55", IocType::Ip)));
        assert!(iocs.contains(&Ioc::new(
            "44d88612fea8a8f36de82e1278abb02f",
            IocType::Md5
        )));
    }

    #[test]
    fn drops_private_ips_from_free_text() {
        let iocs = extract(&alert_with("Lateral movement from 192.168.1.5 and 10.0.0.2"));
        assert!(iocs.iter().all(|i| i.ioc_type != IocType::Ip));
    }

    #[test]
    fn keeps_typed_private_ip() {
        let mut alert = alert_with("internal scan");
        alert.source_ip = Some("192.168.1.100".parse().unwrap());
        let iocs = extract(&alert);
        assert!(iocs.contains(&Ioc::new("192.168.1.100", IocType::Ip)));
    }

    #[test]
    fn extracts_url_and_domain() {
        let iocs = extract(&alert_with(
            "User clicked http://evil.example.com/login.php from mail",
        ));
        assert!(iocs.contains(&Ioc::new(
            "http://evil.example.com/login.php",
            IocType::Url
        )));
        assert!(iocs.contains(&Ioc::new("evil.example.com", IocType::Domain)));
    }

    #[test]
    fn sha256_classified_correctly() {
        let iocs = extract(&alert_with(
            "hash 275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f seen",
        ));
        assert!(iocs
            .iter()
            .any(|i| i.ioc_type == IocType::Sha256));
    }

    #[test]
    fn dedupes_within_alert() {
        let mut alert = alert_with("Repeated 203.0.113.55 and 203.0.113.55 again");
        alert.source_ip = Some("203.0.113.55".parse().unwrap());
        let iocs = extract(&alert);
        let ip_count = iocs.iter().filter(|i| i.ioc_type == IocType::Ip).count();
        assert_eq!(ip_count, 1);
    }
}
