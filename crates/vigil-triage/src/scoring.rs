//! Deterministic baseline risk scoring
//!
//! Always available as the fallback when the LLM path fails. Weighted
//! components, an alert-type multiplier, and a history multiplier, clamped
//! to [0, 100].

use serde_json::Value;

use vigil_core::envelope::EnrichmentSection;
use vigil_core::model::{AlertType, EnrichmentStatus, Severity, ThreatSummary};

const W_SEVERITY: f64 = 0.30;
const W_THREAT: f64 = 0.30;
const W_ASSET: f64 = 0.20;
const W_EXPLOIT: f64 = 0.20;

/// History multiplier applies at >= 3 similar high-risk alerts in 30 days
pub const HISTORY_THRESHOLD: i64 = 3;

/// Input signals, extracted once from the envelope
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    pub severity: Severity,
    /// Aggregate threat score when the summary carried any answer
    pub threat_score: Option<f64>,
    /// "critical" | "high" | "medium" | "low", from asset context
    pub asset_criticality: Option<String>,
    /// Vulnerability entries from asset context
    pub vulnerabilities: Vec<Value>,
    pub alert_type: AlertType,
    /// True when recent similar high-risk alerts crossed the threshold
    pub hot_history: bool,

    // Confidence signals
    pub threat_intel_populated: bool,
    pub asset_context_present: bool,
    pub user_context_present: bool,
    pub similar_history_available: bool,
}

impl ScoreInputs {
    /// Pull signals out of the contextualized message
    pub fn from_message(
        alert_type: AlertType,
        severity: Severity,
        enrichment: Option<&EnrichmentSection>,
        threat_summary: Option<&ThreatSummary>,
        hot_history: bool,
        similar_history_available: bool,
    ) -> Self {
        let asset_data = enrichment
            .and_then(|e| e.asset.as_ref())
            .filter(|a| a.status == EnrichmentStatus::Ok)
            .and_then(|a| a.data.as_ref());

        let user_present = enrichment
            .and_then(|e| e.user.as_ref())
            .is_some_and(|u| u.status == EnrichmentStatus::Ok && u.data.is_some());

        let threat_populated =
            threat_summary.is_some_and(|t| !t.sources_hit.is_empty() || t.score > 0.0);

        Self {
            severity,
            threat_score: threat_summary.map(|t| t.score),
            asset_criticality: asset_data
                .and_then(|d| d.get("criticality"))
                .and_then(Value::as_str)
                .map(ToString::to_string),
            vulnerabilities: asset_data
                .and_then(|d| d.get("vulnerabilities"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            alert_type,
            hot_history,
            threat_intel_populated: threat_populated,
            asset_context_present: asset_data.is_some(),
            user_context_present: user_present,
            similar_history_available,
        }
    }
}

fn severity_component(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 100.0,
        Severity::High => 80.0,
        Severity::Medium => 50.0,
        Severity::Low => 30.0,
        Severity::Info => 10.0,
    }
}

fn asset_component(criticality: Option<&str>) -> f64 {
    match criticality {
        Some("critical") => 100.0,
        Some("high") => 80.0,
        Some("medium") => 50.0,
        Some("low") => 30.0,
        _ => 20.0,
    }
}

/// Known-CVE, has-exploit, and exploit-age signals from asset context
fn exploitability_component(vulnerabilities: &[Value]) -> f64 {
    if vulnerabilities.is_empty() {
        return 20.0;
    }
    let mut score = 20.0f64;
    for vuln in vulnerabilities {
        let has_cve = vuln.get("cve").and_then(Value::as_str).is_some();
        let has_exploit = vuln
            .get("has_exploit")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let fresh_exploit = vuln
            .get("exploit_age_days")
            .and_then(Value::as_i64)
            .is_some_and(|age| age <= 30);

        let this = if has_exploit && fresh_exploit {
            100.0
        } else if has_exploit {
            80.0
        } else if has_cve {
            50.0
        } else {
            20.0
        };
        score = score.max(this);
    }
    score
}

fn type_multiplier(alert_type: AlertType) -> f64 {
    match alert_type {
        AlertType::Ransomware => 1.4,
        AlertType::DataExfiltration => 1.3,
        AlertType::Malware => 1.2,
        AlertType::PolicyViolation => 0.9,
        _ => 1.0,
    }
}

/// The deterministic risk score in [0, 100]
pub fn risk_score(inputs: &ScoreInputs) -> f64 {
    let base = W_SEVERITY * severity_component(inputs.severity)
        + W_THREAT * inputs.threat_score.unwrap_or(0.0)
        + W_ASSET * asset_component(inputs.asset_criticality.as_deref())
        + W_EXPLOIT * exploitability_component(&inputs.vulnerabilities);

    let mut score = base * type_multiplier(inputs.alert_type);
    if inputs.hot_history {
        score *= 1.1;
    }
    score.clamp(0.0, 100.0)
}

/// Fraction of expected input signals that were populated, in [0, 1]
pub fn confidence(inputs: &ScoreInputs) -> f64 {
    let populated = [
        true, // severity always present on a validated alert
        inputs.threat_intel_populated,
        inputs.asset_context_present,
        inputs.user_context_present,
        inputs.similar_history_available,
    ]
    .iter()
    .filter(|p| **p)
    .count();
    populated as f64 / 5.0
}

/// Review rule: hot score, weak confidence, or an always-review alert type
pub fn requires_human_review(risk_score: f64, confidence: f64, alert_type: AlertType) -> bool {
    risk_score >= 70.0
        || confidence < 0.5
        || matches!(
            alert_type,
            AlertType::DataExfiltration | AlertType::Ransomware
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs() -> ScoreInputs {
        ScoreInputs {
            severity: Severity::High,
            threat_score: Some(60.0),
            asset_criticality: Some("critical".to_string()),
            vulnerabilities: vec![],
            alert_type: AlertType::Malware,
            hot_history: false,
            threat_intel_populated: true,
            asset_context_present: true,
            user_context_present: false,
            similar_history_available: false,
        }
    }

    #[test]
    fn weighted_components_and_multiplier() {
        // 0.3*80 + 0.3*60 + 0.2*100 + 0.2*20 = 66; *1.2 = 79.2
        let score = risk_score(&inputs());
        assert!((score - 79.2).abs() < 1e-9);
    }

    #[test]
    fn history_multiplier_and_clamp() {
        let mut i = inputs();
        i.hot_history = true;
        assert!((risk_score(&i) - 87.12).abs() < 1e-9);

        i.severity = Severity::Critical;
        i.threat_score = Some(100.0);
        i.vulnerabilities = vec![json!({"cve": "CVE-2026-0001", "has_exploit": true, "exploit_age_days": 5})];
        i.alert_type = AlertType::Ransomware;
        assert_eq!(risk_score(&i), 100.0);
    }

    #[test]
    fn scenario_high_severity_critical_asset_scores_above_70() {
        // Spec scenario 1: high severity malware on a critical asset with a
        // positive hash verdict must cross the review threshold
        let mut i = inputs();
        i.threat_score = Some(80.0);
        assert!(risk_score(&i) >= 70.0);
    }

    #[test]
    fn exploitability_banding() {
        assert_eq!(exploitability_component(&[]), 20.0);
        assert_eq!(
            exploitability_component(&[json!({"cve": "CVE-2025-1111"})]),
            50.0
        );
        assert_eq!(
            exploitability_component(&[json!({"cve": "CVE-2025-1111", "has_exploit": true})]),
            80.0
        );
        assert_eq!(
            exploitability_component(&[
                json!({"cve": "CVE-2025-1111", "has_exploit": true, "exploit_age_days": 3})
            ]),
            100.0
        );
    }

    #[test]
    fn confidence_is_signal_fraction() {
        let i = inputs();
        // severity + threat intel + asset = 3 of 5
        assert!((confidence(&i) - 0.6).abs() < 1e-9);

        let mut all = inputs();
        all.user_context_present = true;
        all.similar_history_available = true;
        assert!((confidence(&all) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn review_boundaries() {
        assert!(!requires_human_review(69.9, 0.8, AlertType::Malware));
        assert!(requires_human_review(70.0, 0.8, AlertType::Malware));
        assert!(requires_human_review(10.0, 0.49, AlertType::Malware));
        assert!(requires_human_review(10.0, 0.9, AlertType::DataExfiltration));
        assert!(requires_human_review(10.0, 0.9, AlertType::Ransomware));
    }

    #[test]
    fn unknown_asset_criticality_scores_20() {
        let mut i = inputs();
        i.asset_criticality = None;
        // 0.3*80 + 0.3*60 + 0.2*20 + 0.2*20 = 50; *1.2 = 60
        assert!((risk_score(&i) - 60.0).abs() < 1e-9);
    }
}
