//! Intake request shapes and validation
//!
//! Requests arrive loosely typed; everything goes through the canonical
//! Alert schema before a row exists. Validation failures are client errors
//! with a stable shape, never retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_core::model::{Alert, AlertStatus, AlertType, Severity};
use vigil_core::validate::{is_valid_file_hash, is_valid_url, timestamp_in_window};

/// One submitted alert, wire shape
#[derive(Debug, Clone, Deserialize)]
pub struct IngestAlert {
    #[serde(default)]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub source_ip: Option<String>,
    #[serde(default)]
    pub target_ip: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default)]
    pub raw_payload: Option<serde_json::Value>,
}

/// One field-level validation failure
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Batch wire shape, at most 100 items
#[derive(Debug, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub alerts: Vec<IngestAlert>,
}

impl IngestAlert {
    /// Validate into a canonical Alert. All failures are collected, not
    /// just the first.
    pub fn validate(self, now: DateTime<Utc>) -> Result<Alert, Vec<FieldError>> {
        let mut errors = Vec::new();

        let alert_id = match self.alert_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                errors.push(FieldError::new("alert_id", "required"));
                String::new()
            }
        };

        let alert_type = match self.alert_type.as_deref() {
            Some(raw) => AlertType::parse(raw).unwrap_or_else(|| {
                errors.push(FieldError::new(
                    "alert_type",
                    format!("unknown alert type: {raw}"),
                ));
                AlertType::Other
            }),
            None => {
                errors.push(FieldError::new("alert_type", "required"));
                AlertType::Other
            }
        };

        let severity = match self.severity.as_deref() {
            Some(raw) => Severity::parse(raw).unwrap_or_else(|| {
                errors.push(FieldError::new(
                    "severity",
                    format!("unknown severity: {raw}"),
                ));
                Severity::Info
            }),
            None => {
                errors.push(FieldError::new("severity", "required"));
                Severity::Info
            }
        };

        let description = match self.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => {
                errors.push(FieldError::new("description", "required"));
                String::new()
            }
        };

        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => {
                    let ts = ts.with_timezone(&Utc);
                    if !timestamp_in_window(ts, now) {
                        errors.push(FieldError::new(
                            "timestamp",
                            "outside accepted window (30d past to 5m future)",
                        ));
                    }
                    ts
                }
                Err(_) => {
                    errors.push(FieldError::new("timestamp", "not RFC-3339"));
                    now
                }
            },
            None => now,
        };

        let parse_ip = |raw: &Option<String>,
                        field: &'static str,
                        errors: &mut Vec<FieldError>|
         -> Option<std::net::IpAddr> {
            raw.as_deref().and_then(|s| {
                s.parse().map(Some).unwrap_or_else(|_| {
                    errors.push(FieldError::new(field, format!("not a valid IP: {s}")));
                    None
                })
            })
        };
        let source_ip = parse_ip(&self.source_ip, "source_ip", &mut errors);
        let target_ip = parse_ip(&self.target_ip, "target_ip", &mut errors);

        let file_hash = self.file_hash.as_deref().map(str::trim).and_then(|h| {
            if is_valid_file_hash(h) {
                Some(h.to_lowercase())
            } else {
                errors.push(FieldError::new(
                    "file_hash",
                    "not a valid MD5/SHA1/SHA256 hex digest",
                ));
                None
            }
        });

        let url = self.url.as_deref().map(str::trim).and_then(|u| {
            if is_valid_url(u) {
                Some(u.to_string())
            } else {
                errors.push(FieldError::new("url", "not a valid URL"));
                None
            }
        });

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Alert {
            id: Uuid::new_v4(),
            alert_id,
            alert_type,
            severity,
            status: AlertStatus::New,
            description,
            source: self
                .source
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("generic")
                .to_string(),
            timestamp,
            source_ip,
            target_ip,
            file_hash,
            url,
            asset_id: self.asset_id,
            user_id: self.user_id,
            process_name: self.process_name,
            raw_payload: self.raw_payload.unwrap_or(serde_json::Value::Null),
            fingerprint: None,
            risk_score: None,
            assigned_to: None,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn valid() -> IngestAlert {
        IngestAlert {
            alert_id: Some("ALT-001".to_string()),
            alert_type: Some("malware".to_string()),
            severity: Some("high".to_string()),
            description: Some("EICAR detected".to_string()),
            source: Some("splunk".to_string()),
            timestamp: None,
            source_ip: Some("192.168.1.100".to_string()),
            target_ip: None,
            file_hash: Some("44D88612FEA8A8F36DE82E1278ABB02F".to_string()),
            url: None,
            asset_id: Some("SRV-001".to_string()),
            user_id: None,
            process_name: None,
            raw_payload: None,
        }
    }

    #[test]
    fn valid_alert_passes_and_normalizes_hash_case() {
        let alert = valid().validate(Utc::now()).unwrap();
        assert_eq!(alert.alert_type, AlertType::Malware);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(
            alert.file_hash.as_deref(),
            Some("44d88612fea8a8f36de82e1278abb02f")
        );
        assert_eq!(alert.status, AlertStatus::New);
    }

    #[test]
    fn missing_required_fields_all_reported() {
        let errors = IngestAlert {
            alert_id: None,
            alert_type: None,
            severity: None,
            description: None,
            source: None,
            timestamp: None,
            source_ip: None,
            target_ip: None,
            file_hash: None,
            url: None,
            asset_id: None,
            user_id: None,
            process_name: None,
            raw_payload: None,
        }
        .validate(Utc::now())
        .unwrap_err();

        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"alert_id"));
        assert!(fields.contains(&"alert_type"));
        assert!(fields.contains(&"severity"));
        assert!(fields.contains(&"description"));
    }

    #[test]
    fn bogus_alert_type_is_rejected_not_coerced() {
        let mut bad = valid();
        bad.alert_type = Some("unknown-bogus".to_string());
        let errors = bad.validate(Utc::now()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "alert_type"));
    }

    #[test]
    fn timestamp_window_boundaries() {
        let now = Utc::now();

        let mut edge = valid();
        edge.timestamp = Some((now + Duration::minutes(5)).to_rfc3339());
        assert!(edge.validate(now).is_ok());

        let mut future = valid();
        future.timestamp =
            Some((now + Duration::minutes(5) + Duration::seconds(2)).to_rfc3339());
        assert!(future.validate(now).is_err());

        let mut ancient = valid();
        ancient.timestamp =
            Some((now - Duration::days(30) - Duration::seconds(2)).to_rfc3339());
        assert!(ancient.validate(now).is_err());
    }

    #[test]
    fn malformed_observables_are_rejected() {
        let mut bad = valid();
        bad.source_ip = Some("999.1.2.3".to_string());
        bad.file_hash = Some("zznothex".to_string());
        bad.url = Some("not a url".to_string());
        let errors = bad.validate(Utc::now()).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"source_ip"));
        assert!(fields.contains(&"file_hash"));
        assert!(fields.contains(&"url"));
    }

    #[test]
    fn missing_source_defaults_to_generic() {
        let mut alert = valid();
        alert.source = None;
        assert_eq!(alert.validate(Utc::now()).unwrap().source, "generic");
    }
}
