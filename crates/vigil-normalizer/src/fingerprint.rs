//! Dedup fingerprint
//!
//! SHA-256 over the canonical subset plus a time bucket. Two alerts with the
//! same observables inside one window collide on purpose.

use sha2::{Digest, Sha256};

use vigil_core::model::Alert;

/// Compute the fingerprint for an alert within a dedup window (seconds)
pub fn compute(alert: &Alert, window_secs: u64) -> String {
    let bucket = alert.timestamp.timestamp() / window_secs.max(1) as i64;

    let mut hasher = Sha256::new();
    hasher.update(alert.alert_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(
        alert
            .source_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(
        alert
            .target_ip
            .map(|ip| ip.to_string())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(alert.file_hash.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(alert.url.as_deref().unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;
    use vigil_core::model::{AlertStatus, AlertType, Severity};

    fn alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            alert_id: "A-1".to_string(),
            alert_type: AlertType::Malware,
            severity: Severity::High,
            status: AlertStatus::New,
            description: "desc".to_string(),
            source: "splunk".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 10, 0, 0).unwrap(),
            source_ip: Some("192.168.1.100".parse().unwrap()),
            target_ip: None,
            file_hash: Some("44d88612fea8a8f36de82e1278abb02f".to_string()),
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
    fn identical_alerts_in_window_collide() {
        let a = alert();
        let mut b = alert();
        b.id = Uuid::new_v4();
        b.description = "different free text".to_string();
        b.timestamp = a.timestamp + Duration::seconds(60);
        // Same 5-minute bucket
        assert_eq!(compute(&a, 300), compute(&b, 300));
    }

    #[test]
    fn different_window_bucket_differs() {
        let a = alert();
        let mut b = alert();
        b.timestamp = a.timestamp + Duration::seconds(301);
        assert_ne!(compute(&a, 300), compute(&b, 300));
    }

    #[test]
    fn observable_changes_break_collision() {
        let a = alert();
        let mut b = alert();
        b.source_ip = Some("192.168.1.101".parse().unwrap());
        assert_ne!(compute(&a, 300), compute(&b, 300));
    }
}
