//! Prompt templates per alert type
//!
//! Each template contracts for the same JSON output shape and carries its
//! own default remediation steps, which double as the fallback actions when
//! the LLM path fails.

use vigil_core::envelope::EnrichmentSection;
use vigil_core::model::{
    ActionPriority, Alert, AlertType, Ioc, RecommendedAction, SimilarAlert, ThreatSummary,
};

/// Output contract appended to every template
const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:
{
  "risk_level": "low" | "medium" | "high" | "critical",
  "confidence": 0.0-1.0,
  "reasoning": "concise analysis",
  "recommended_actions": ["ordered remediation steps"],
  "iocs": ["indicators worth tracking"],
  "references": ["relevant advisories or techniques"]
}"#;

/// Template key: the closed set the prompt selector dispatches over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Malware,
    Phishing,
    BruteForce,
    DataExfiltration,
    General,
}

impl TemplateKind {
    pub fn for_alert_type(alert_type: AlertType) -> Self {
        match alert_type {
            AlertType::Malware | AlertType::Ransomware => Self::Malware,
            AlertType::Phishing => Self::Phishing,
            AlertType::BruteForce => Self::BruteForce,
            AlertType::DataExfiltration => Self::DataExfiltration,
            _ => Self::General,
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::Malware => {
                "You are analyzing a malware detection. Weigh the file hash \
                 reputation, lateral-movement potential, and the criticality of \
                 the affected asset."
            }
            Self::Phishing => {
                "You are analyzing a phishing alert. Weigh the sender domain \
                 reputation, credential-theft indicators, and which users were \
                 targeted."
            }
            Self::BruteForce => {
                "You are analyzing a brute-force authentication alert. Weigh \
                 attempt volume, source reputation, and whether the targeted \
                 account is privileged."
            }
            Self::DataExfiltration => {
                "You are analyzing a possible data exfiltration. Weigh transfer \
                 volume, destination reputation, and the sensitivity of the \
                 involved asset. Treat this class as high-stakes."
            }
            Self::General => {
                "You are analyzing a security alert. Weigh the observables, \
                 enrichment context, and threat intelligence verdicts."
            }
        }
    }

    /// Template-default remediation steps, merged into every result
    pub fn default_actions(self) -> Vec<RecommendedAction> {
        let step = |action: &str, priority: ActionPriority, automatable: bool| RecommendedAction {
            action: action.to_string(),
            priority,
            automatable,
            owner: None,
        };
        match self {
            Self::Malware => vec![
                step("Isolate the affected host", ActionPriority::Immediate, true),
                step("Quarantine the flagged file and collect a sample", ActionPriority::High, true),
                step("Sweep the fleet for the file hash", ActionPriority::High, false),
            ],
            Self::Phishing => vec![
                step("Purge the message from all mailboxes", ActionPriority::Immediate, true),
                step("Reset credentials for recipients who interacted", ActionPriority::High, false),
                step("Block the sender domain and URL", ActionPriority::High, true),
            ],
            Self::BruteForce => vec![
                step("Block the source IP at the perimeter", ActionPriority::Immediate, true),
                step("Lock and review the targeted account", ActionPriority::High, false),
                step("Enforce MFA on the targeted account", ActionPriority::Medium, false),
            ],
            Self::DataExfiltration => vec![
                step("Block the destination endpoint", ActionPriority::Immediate, true),
                step("Suspend the involved credentials", ActionPriority::Immediate, false),
                step("Scope transferred data for notification duties", ActionPriority::High, false),
            ],
            Self::General => vec![
                step("Review the alert context and confirm scope", ActionPriority::High, false),
                step("Escalate to the on-call analyst if activity persists", ActionPriority::Medium, false),
            ],
        }
    }
}

/// Assemble the analysis prompt from everything the pipeline gathered
pub fn build_prompt(
    alert: &Alert,
    enrichment: Option<&EnrichmentSection>,
    threat_summary: Option<&ThreatSummary>,
    iocs: &[Ioc],
    similar: &[SimilarAlert],
) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "## Alert\n- id: {}\n- type: {}\n- severity: {}\n- source: {}\n- time: {}\n- description: {}",
        alert.alert_id,
        alert.alert_type,
        alert.severity,
        alert.source,
        alert.timestamp.to_rfc3339(),
        alert.description,
    ));

    let mut observables = Vec::new();
    if let Some(ip) = alert.source_ip {
        observables.push(format!("source_ip={ip}"));
    }
    if let Some(ip) = alert.target_ip {
        observables.push(format!("target_ip={ip}"));
    }
    if let Some(hash) = &alert.file_hash {
        observables.push(format!("file_hash={hash}"));
    }
    if let Some(url) = &alert.url {
        observables.push(format!("url={url}"));
    }
    if let Some(asset) = &alert.asset_id {
        observables.push(format!("asset={asset}"));
    }
    if let Some(user) = &alert.user_id {
        observables.push(format!("user={user}"));
    }
    if !observables.is_empty() {
        sections.push(format!("## Observables\n{}", observables.join("\n")));
    }

    if !iocs.is_empty() {
        let lines: Vec<String> = iocs
            .iter()
            .map(|ioc| format!("- {} ({})", ioc.value, ioc.ioc_type))
            .collect();
        sections.push(format!("## Extracted IOCs\n{}", lines.join("\n")));
    }

    if let Some(enrichment) = enrichment {
        let mut lines = Vec::new();
        for (label, ctx) in [
            ("network", &enrichment.network),
            ("asset", &enrichment.asset),
            ("user", &enrichment.user),
        ] {
            if let Some(ctx) = ctx {
                match &ctx.data {
                    Some(data) => lines.push(format!("- {label}: {data}")),
                    None => lines.push(format!("- {label}: (partial, no data)")),
                }
            }
        }
        if !lines.is_empty() {
            sections.push(format!("## Enrichment\n{}", lines.join("\n")));
        }
    }

    if let Some(summary) = threat_summary {
        sections.push(format!(
            "## Threat intelligence\n- aggregate score: {:.1}\n- level: {}\n- confidence: {:.2}\n- sources hit: {}",
            summary.score,
            summary.threat_level,
            summary.confidence,
            if summary.sources_hit.is_empty() {
                "none".to_string()
            } else {
                summary.sources_hit.join(", ")
            },
        ));
    }

    if !similar.is_empty() {
        let lines: Vec<String> = similar
            .iter()
            .map(|s| {
                format!(
                    "- {} {} (similarity {:.2}, risk {})",
                    s.alert_type,
                    s.severity,
                    s.similarity,
                    s.risk_level.map_or("unknown", |r| r.as_str()),
                )
            })
            .collect();
        sections.push(format!("## Similar historical alerts\n{}", lines.join("\n")));
    }

    let kind = TemplateKind::for_alert_type(alert.alert_type);
    format!(
        "{}\n\n{}\n\n{}",
        kind.focus(),
        sections.join("\n\n"),
        OUTPUT_CONTRACT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_core::model::{AlertStatus, Severity};

    fn alert(alert_type: AlertType) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            alert_id: "A-1".to_string(),
            alert_type,
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
            raw_payload: serde_json::Value::Null,
            fingerprint: None,
            risk_score: None,
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn template_dispatch_covers_the_closed_set() {
        assert_eq!(
            TemplateKind::for_alert_type(AlertType::Malware),
            TemplateKind::Malware
        );
        assert_eq!(
            TemplateKind::for_alert_type(AlertType::Ransomware),
            TemplateKind::Malware
        );
        assert_eq!(
            TemplateKind::for_alert_type(AlertType::DataExfiltration),
            TemplateKind::DataExfiltration
        );
        assert_eq!(
            TemplateKind::for_alert_type(AlertType::Ddos),
            TemplateKind::General
        );
    }

    #[test]
    fn prompt_carries_contract_and_observables() {
        let prompt = build_prompt(&alert(AlertType::Malware), None, None, &[], &[]);
        assert!(prompt.contains("risk_level"));
        assert!(prompt.contains("file_hash=44d88612fea8a8f36de82e1278abb02f"));
        assert!(prompt.contains("malware detection"));
    }

    #[test]
    fn every_template_has_default_actions() {
        for kind in [
            TemplateKind::Malware,
            TemplateKind::Phishing,
            TemplateKind::BruteForce,
            TemplateKind::DataExfiltration,
            TemplateKind::General,
        ] {
            assert!(!kind.default_actions().is_empty());
        }
    }
}
