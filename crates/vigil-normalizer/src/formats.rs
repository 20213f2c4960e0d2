//! Vendor format handlers
//!
//! Pure functions from a raw vendor payload to canonical field overrides.
//! The ingestor already validated the canonical shell; handlers recover the
//! richer detail vendors bury in their own layouts.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use vigil_core::model::{AlertType, Severity};

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unparseable {format} payload: {reason}")]
    Unparseable { format: &'static str, reason: String },
}

/// Canonical field overrides recovered from a vendor payload.
/// `None` leaves the ingested value untouched.
#[derive(Debug, Default, Clone)]
pub struct VendorFields {
    pub alert_type: Option<AlertType>,
    pub severity: Option<Severity>,
    pub description: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source_ip: Option<IpAddr>,
    pub target_ip: Option<IpAddr>,
    pub file_hash: Option<String>,
    pub url: Option<String>,
    pub asset_id: Option<String>,
    pub user_id: Option<String>,
    pub process_name: Option<String>,
}

/// Dispatch on the source hint. Unknown sources fall through to the generic
/// handler rather than failing: the canonical shell is already valid.
pub fn normalize(source: &str, raw: &Value) -> Result<VendorFields, FormatError> {
    if raw.is_null() || raw == &Value::Object(serde_json::Map::new()) {
        return Ok(VendorFields::default());
    }
    match source.to_ascii_lowercase().as_str() {
        "splunk" => splunk(raw),
        "qradar" => qradar(raw),
        "cef" => cef(raw),
        _ => Ok(generic(raw)),
    }
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn ip_field(obj: &Value, key: &str) -> Option<IpAddr> {
    str_field(obj, key).and_then(|s| s.parse().ok())
}

/// Splunk notable events: fields live under `result`, sometimes `fields`
fn splunk(raw: &Value) -> Result<VendorFields, FormatError> {
    let body = raw
        .get("result")
        .or_else(|| raw.get("fields"))
        .unwrap_or(raw);
    if !body.is_object() {
        return Err(FormatError::Unparseable {
            format: "splunk",
            reason: "result is not an object".to_string(),
        });
    }

    Ok(VendorFields {
        severity: str_field(body, "severity")
            .or_else(|| str_field(body, "urgency"))
            .and_then(|s| Severity::parse(&s)),
        description: str_field(body, "signature").or_else(|| str_field(body, "search_name")),
        timestamp: str_field(body, "_time")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
        source_ip: ip_field(body, "src_ip").or_else(|| ip_field(body, "src")),
        target_ip: ip_field(body, "dest_ip").or_else(|| ip_field(body, "dest")),
        file_hash: str_field(body, "file_hash"),
        url: str_field(body, "url"),
        asset_id: str_field(body, "dest_asset").or_else(|| str_field(body, "asset_id")),
        user_id: str_field(body, "user"),
        process_name: str_field(body, "process_name").or_else(|| str_field(body, "process")),
        ..Default::default()
    })
}

/// QRadar offenses: magnitude 1-10 maps onto severity bands
fn qradar(raw: &Value) -> Result<VendorFields, FormatError> {
    if !raw.is_object() {
        return Err(FormatError::Unparseable {
            format: "qradar",
            reason: "payload is not an object".to_string(),
        });
    }

    let severity = raw
        .get("magnitude")
        .and_then(Value::as_u64)
        .map(|m| match m {
            9..=u64::MAX => Severity::Critical,
            7..=8 => Severity::High,
            4..=6 => Severity::Medium,
            2..=3 => Severity::Low,
            _ => Severity::Info,
        });

    Ok(VendorFields {
        severity,
        description: str_field(raw, "description").or_else(|| str_field(raw, "offense_source")),
        source_ip: ip_field(raw, "sourceip").or_else(|| ip_field(raw, "source_address")),
        target_ip: ip_field(raw, "destinationip").or_else(|| ip_field(raw, "local_destination_address")),
        user_id: str_field(raw, "username"),
        ..Default::default()
    })
}

/// CEF: `CEF:0|vendor|product|version|sigid|name|severity|key=value ...`
fn cef(raw: &Value) -> Result<VendorFields, FormatError> {
    let line = raw
        .as_str()
        .or_else(|| raw.get("raw").and_then(Value::as_str))
        .ok_or_else(|| FormatError::Unparseable {
            format: "cef",
            reason: "no CEF string found".to_string(),
        })?;

    let rest = line
        .trim()
        .strip_prefix("CEF:")
        .ok_or_else(|| FormatError::Unparseable {
            format: "cef",
            reason: "missing CEF: prefix".to_string(),
        })?;

    let mut parts = rest.splitn(8, '|');
    let header: Vec<&str> = (&mut parts).take(7).collect();
    if header.len() < 7 {
        return Err(FormatError::Unparseable {
            format: "cef",
            reason: "short CEF header".to_string(),
        });
    }
    let name = header[5];
    let severity = header[6].trim().parse::<u8>().ok().map(|s| match s {
        9..=10 => Severity::Critical,
        7..=8 => Severity::High,
        4..=6 => Severity::Medium,
        1..=3 => Severity::Low,
        _ => Severity::Info,
    });
    let extension = parts.next().unwrap_or("");

    let mut fields = VendorFields {
        severity,
        description: (!name.is_empty()).then(|| name.to_string()),
        ..Default::default()
    };

    for (key, value) in parse_cef_extension(extension) {
        match key.as_str() {
            "src" => fields.source_ip = value.parse().ok(),
            "dst" => fields.target_ip = value.parse().ok(),
            "fileHash" => fields.file_hash = Some(value),
            "request" => fields.url = Some(value),
            "suser" | "duser" => fields.user_id = Some(value),
            "dproc" | "sproc" => fields.process_name = Some(value),
            "dhost" => fields.asset_id = Some(value),
            _ => {}
        }
    }

    Ok(fields)
}

/// CEF extension tokens: space-separated key=value where values may contain
/// spaces up to the next key= token
fn parse_cef_extension(extension: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for token in extension.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            pairs.push((key.to_string(), value.to_string()));
        } else if let Some(last) = pairs.last_mut() {
            last.1.push(' ');
            last.1.push_str(token);
        }
    }
    pairs
}

/// Generic: canonical field names at the payload's top level
fn generic(raw: &Value) -> VendorFields {
    VendorFields {
        alert_type: str_field(raw, "alert_type").and_then(|s| AlertType::parse(&s)),
        severity: str_field(raw, "severity").and_then(|s| Severity::parse(&s)),
        description: str_field(raw, "description"),
        source_ip: ip_field(raw, "source_ip"),
        target_ip: ip_field(raw, "target_ip"),
        file_hash: str_field(raw, "file_hash"),
        url: str_field(raw, "url"),
        asset_id: str_field(raw, "asset_id"),
        user_id: str_field(raw, "user_id"),
        process_name: str_field(raw, "process_name"),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splunk_result_fields() {
        let raw = json!({
            "result": {
                "severity": "high",
                "signature": "EICAR detected",
                "src_ip": "192.168.1.100",
                "dest": "10.0.0.5",
                "file_hash": "44d88612fea8a8f36de82e1278abb02f",
                "user": "jdoe"
            }
        });
        let fields = normalize("splunk", &raw).unwrap();
        assert_eq!(fields.severity, Some(Severity::High));
        assert_eq!(fields.description.as_deref(), Some("EICAR detected"));
        assert_eq!(fields.source_ip, Some("192.168.1.100".parse().unwrap()));
        assert_eq!(fields.target_ip, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(fields.user_id.as_deref(), Some("jdoe"));
    }

    #[test]
    fn qradar_magnitude_bands() {
        let fields = normalize("qradar", &json!({"magnitude": 9, "sourceip": "203.0.113.9"}))
            .unwrap();
        assert_eq!(fields.severity, Some(Severity::Critical));
        assert_eq!(fields.source_ip, Some("203.0.113.9".parse().unwrap()));

        let fields = normalize("qradar", &json!({"magnitude": 5})).unwrap();
        assert_eq!(fields.severity, Some(Severity::Medium));
    }

    #[test]
    fn cef_line_parses_header_and_extension() {
        let line = "CEF:0|Vendor|IDS|1.0|4201|Suspicious outbound transfer|8|src=203.0.113.7 dst=10.1.2.3 suser=asmith request=http://evil.example.com/x dproc=powershell.exe";
        let fields = normalize("cef", &json!(line)).unwrap();
        assert_eq!(fields.severity, Some(Severity::High));
        assert_eq!(
            fields.description.as_deref(),
            Some("Suspicious outbound transfer")
        );
        assert_eq!(fields.source_ip, Some("203.0.113.7".parse().unwrap()));
        assert_eq!(fields.url.as_deref(), Some("http://evil.example.com/x"));
        assert_eq!(fields.process_name.as_deref(), Some("powershell.exe"));
    }

    #[test]
    fn cef_extension_values_with_spaces() {
        let pairs = parse_cef_extension("msg=two words here src=1.2.3.4");
        assert_eq!(pairs[0], ("msg".to_string(), "two words here".to_string()));
        assert_eq!(pairs[1], ("src".to_string(), "1.2.3.4".to_string()));
    }

    #[test]
    fn cef_garbage_is_unparseable() {
        assert!(normalize("cef", &json!("not a cef line")).is_err());
        assert!(normalize("cef", &json!({"no": "string"})).is_err());
    }

    #[test]
    fn empty_payload_is_identity() {
        let fields = normalize("splunk", &json!({})).unwrap();
        assert!(fields.severity.is_none());
        assert!(fields.description.is_none());
    }

    #[test]
    fn unknown_source_uses_generic() {
        let fields = normalize("crowdstrike", &json!({"severity": "low", "user_id": "u1"})).unwrap();
        assert_eq!(fields.severity, Some(Severity::Low));
        assert_eq!(fields.user_id.as_deref(), Some("u1"));
    }
}
