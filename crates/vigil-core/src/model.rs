//! Canonical alert model and per-stage extension records
//!
//! The relational store owns persistent state; these types are the shapes
//! that cross stage boundaries and land in tables. Stage workers extend the
//! section they own and preserve the rest unchanged.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert classification, closed set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Malware,
    Phishing,
    BruteForce,
    Ddos,
    DataExfiltration,
    UnauthorizedAccess,
    PolicyViolation,
    Anomaly,
    Vulnerability,
    Intrusion,
    Ransomware,
    Other,
}

impl AlertType {
    /// Parse the wire form (`snake_case`); unknown values are rejected, not
    /// coerced to `Other`, so bogus submissions fail validation.
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malware => "malware",
            Self::Phishing => "phishing",
            Self::BruteForce => "brute_force",
            Self::Ddos => "ddos",
            Self::DataExfiltration => "data_exfiltration",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::PolicyViolation => "policy_violation",
            Self::Anomaly => "anomaly",
            Self::Vulnerability => "vulnerability",
            Self::Intrusion => "intrusion",
            Self::Ransomware => "ransomware",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity as reported by the source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Broker message priority derived from severity (1-10)
    pub fn priority(&self) -> u8 {
        match self {
            Self::Critical => 10,
            Self::High => 8,
            Self::Medium => 5,
            Self::Low => 3,
            Self::Info => 1,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    InProgress,
    Assigned,
    Resolved,
    Closed,
    Duplicate,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Assigned => "assigned",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Internal surrogate UUID
    pub id: Uuid,
    /// External id, unique per source
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub description: String,
    /// Originating system, e.g. "splunk", "qradar", "cef"
    pub source: String,
    pub timestamp: DateTime<Utc>,

    // Observables, all optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,

    /// Opaque original payload, stored but never interpreted downstream
    #[serde(default)]
    pub raw_payload: serde_json::Value,

    /// SHA-256 dedup fingerprint, set by the normalizer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Set iff a successful triage result exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Indicator of compromise type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    Ip,
    Domain,
    Url,
    Md5,
    Sha1,
    Sha256,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Domain => "domain",
            Self::Url => "url",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for IocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator of compromise
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Ioc {
    pub value: String,
    pub ioc_type: IocType,
}

impl Ioc {
    pub fn new(value: impl Into<String>, ioc_type: IocType) -> Self {
        Self {
            value: value.into(),
            ioc_type,
        }
    }
}

/// Enrichment context kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Network,
    Asset,
    User,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Asset => "asset",
            Self::User => "user",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a collector produced a full result or timed out / missed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Ok,
    Partial,
}

/// One context row per (alert, context kind)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentContext {
    pub context_type: ContextType,
    /// Collector that produced it, e.g. "geoip", "cmdb", "directory"
    pub source: String,
    pub status: EnrichmentStatus,
    /// Opaque structured payload; None when status is partial
    pub data: Option<serde_json::Value>,
    pub collected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_hint_secs: Option<u64>,
}

/// Threat level banding used for both per-IOC and per-alert scores
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Clean,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Band an aggregate score: >= 75 critical, >= 50 high, >= 25 medium,
    /// > 0 low, == 0 clean.
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Self::Critical
        } else if score >= 50.0 {
            Self::High
        } else if score >= 25.0 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::Clean
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted threat-intel row, one per (ioc, ioc_type), upserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIntelRecord {
    pub ioc: String,
    pub ioc_type: IocType,
    pub threat_level: ThreatLevel,
    pub threat_score: f64,
    pub sources_queried: Vec<String>,
    pub sources_hit: Vec<String>,
    pub last_seen: DateTime<Utc>,
    pub raw_vendor_data: serde_json::Value,
}

/// Per-IOC assessment inside a threat summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocAssessment {
    pub ioc: Ioc,
    pub score: f64,
    pub threat_level: ThreatLevel,
    /// Fraction of configured sources that responded in time
    pub confidence: f64,
    pub sources_hit: Vec<String>,
}

/// Aggregated threat summary attached to the message by S4.
///
/// `score` is the maximum per-IOC aggregate: one hot indicator is enough to
/// make the alert hot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatSummary {
    pub score: f64,
    pub threat_level: ThreatLevel,
    pub confidence: f64,
    pub iocs: Vec<IocAssessment>,
    pub sources_queried: Vec<String>,
    pub sources_hit: Vec<String>,
}

impl ThreatSummary {
    /// Summary for an alert that carried no IOCs or got no answers
    pub fn empty(sources_queried: Vec<String>) -> Self {
        Self {
            score: 0.0,
            threat_level: ThreatLevel::Clean,
            confidence: 0.0,
            iocs: Vec::new(),
            sources_queried,
            sources_hit: Vec::new(),
        }
    }
}

/// Risk banding for a triage result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Critical
        } else if score >= 70.0 {
            Self::High
        } else if score >= 40.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action priority on a recommended remediation step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionPriority {
    Immediate,
    High,
    Medium,
    Low,
}

/// One recommended remediation step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedAction {
    pub action: String,
    pub priority: ActionPriority,
    pub automatable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Final triage output, at most one per alert (upsert on alert id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub alert_id: Uuid,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub analysis_text: String,
    pub key_findings: Vec<String>,
    pub recommended_actions: Vec<RecommendedAction>,
    pub iocs_extracted: Vec<Ioc>,
    pub model_used: String,
    pub processing_ms: u64,
    /// Monotonic per triage write; downstream idempotency key with alert_id
    pub result_version: i32,
    pub requires_human_review: bool,
}

/// A historical alert returned by the similarity service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarAlert {
    pub alert_uuid: Uuid,
    pub similarity: f64,
    pub alert_type: AlertType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_type_rejects_unknown() {
        assert_eq!(AlertType::parse("malware"), Some(AlertType::Malware));
        assert_eq!(AlertType::parse("brute_force"), Some(AlertType::BruteForce));
        assert_eq!(AlertType::parse("unknown-bogus"), None);
    }

    #[test]
    fn severity_priority_mapping() {
        assert_eq!(Severity::Critical.priority(), 10);
        assert_eq!(Severity::High.priority(), 8);
        assert_eq!(Severity::Medium.priority(), 5);
        assert_eq!(Severity::Low.priority(), 3);
        assert_eq!(Severity::Info.priority(), 1);
    }

    #[test]
    fn threat_level_banding() {
        assert_eq!(ThreatLevel::from_score(75.0), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::from_score(74.9), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(50.0), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(25.0), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(0.1), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(0.0), ThreatLevel::Clean);
    }

    #[test]
    fn risk_level_boundary_at_70() {
        assert_eq!(RiskLevel::from_score(69.9), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::High);
    }

    #[test]
    fn enum_wire_format_is_snake_case() {
        let json = serde_json::to_string(&AlertType::DataExfiltration).unwrap();
        assert_eq!(json, "\"data_exfiltration\"");
        let json = serde_json::to_string(&IocType::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
    }
}
