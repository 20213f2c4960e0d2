//! Broker message body
//!
//! Each stage reads the sections it needs, appends the section it owns, and
//! preserves everything else unchanged, including fields this version does
//! not know about.

use serde::{Deserialize, Serialize};

use crate::model::{Alert, EnrichmentContext, Ioc, ThreatSummary, TriageResult};

/// Enrichment sections appended by the context collector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<EnrichmentContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<EnrichmentContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<EnrichmentContext>,
}

impl EnrichmentSection {
    pub fn is_empty(&self) -> bool {
        self.network.is_none() && self.asset.is_none() && self.user.is_none()
    }
}

/// JSON body carried on every pipeline subject.
///
/// Unknown top-level fields survive a deserialize/serialize round trip via
/// the flattened `extra` map, so upstream additions do not break downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEnvelope {
    pub alert: Alert,

    /// IOCs extracted by the normalizer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iocs: Vec<Ioc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_summary: Option<ThreatSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub triage: Option<TriageResult>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AlertEnvelope {
    pub fn new(alert: Alert) -> Self {
        Self {
            alert,
            iocs: Vec::new(),
            enrichment: None,
            threat_summary: None,
            triage: None,
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, AlertType, Severity};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            alert_id: "ALT-001".to_string(),
            alert_type: AlertType::Malware,
            severity: Severity::High,
            status: AlertStatus::New,
            description: "EICAR detected".to_string(),
            source: "splunk".to_string(),
            timestamp: Utc::now(),
            source_ip: Some("192.168.1.100".parse().unwrap()),
            target_ip: None,
            file_hash: Some("44d88612fea8a8f36de82e1278abb02f".to_string()),
            url: None,
            asset_id: Some("SRV-001".to_string()),
            user_id: None,
            process_name: None,
            raw_payload: serde_json::json!({"original": true}),
            fingerprint: None,
            risk_score: None,
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn round_trip_preserves_canonical_fields() {
        let envelope = AlertEnvelope::new(sample_alert());
        let json = serde_json::to_string(&envelope).unwrap();
        let back: AlertEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(back.alert.alert_id, envelope.alert.alert_id);
        assert_eq!(back.alert.id, envelope.alert.id);
        assert_eq!(back.alert.source_ip, envelope.alert.source_ip);
        assert_eq!(back.alert.file_hash, envelope.alert.file_hash);
        assert_eq!(back.alert.timestamp, envelope.alert.timestamp);
    }

    #[test]
    fn round_trip_preserves_unknown_fields() {
        let mut envelope = AlertEnvelope::new(sample_alert());
        envelope.extra.insert(
            "upstream_extension".to_string(),
            serde_json::json!({"key": "value"}),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let back: AlertEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.extra.get("upstream_extension"),
            Some(&serde_json::json!({"key": "value"}))
        );
    }
}
