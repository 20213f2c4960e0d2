//! Triage stage handler
//!
//! Deterministic baseline first, LLM augmentation second, merge third. The
//! numeric risk score is always the deterministic one; the LLM contributes
//! qualitative judgment. Every failure on the LLM path degrades to the
//! deterministic result with `model_used = "fallback"`.

use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use vigil_bus::{subjects, MessageMeta, StageError, StageHandler, StageOutcome};
use vigil_core::model::{
    ActionPriority, Ioc, IocType, RecommendedAction, RiskLevel, SimilarAlert, TriageResult,
};
use vigil_core::validate::{hash_type, is_valid_domain, is_valid_url};
use vigil_core::AlertEnvelope;
use vigil_data::db::Db;

use crate::llm::{derive_complexity, LlmClient, LlmError, RouterClient};
use crate::parse::{parse_analysis, LlmAnalysis};
use crate::prompts::{build_prompt, TemplateKind};
use crate::scoring::{self, ScoreInputs, HISTORY_THRESHOLD};
use crate::similar::SimilarityClient;

pub struct TriageHandler {
    db: Db,
    router: RouterClient,
    llm: LlmClient,
    similarity: SimilarityClient,
}

impl TriageHandler {
    pub fn new(
        db: Db,
        router: RouterClient,
        llm: LlmClient,
        similarity: SimilarityClient,
    ) -> Self {
        Self {
            db,
            router,
            llm,
            similarity,
        }
    }

    /// Router + completion + parse. None on any failure; triage proceeds
    /// deterministically.
    async fn llm_analysis(
        &self,
        envelope: &AlertEnvelope,
        inputs: &ScoreInputs,
        similar: &[SimilarAlert],
    ) -> Option<(String, LlmAnalysis)> {
        let complexity = derive_complexity(
            envelope.alert.severity,
            inputs.threat_score,
            inputs.asset_criticality.as_deref(),
        );

        let model = match self.router.choose(complexity).await {
            Ok(model) => model,
            Err(LlmError::NoModel) => {
                warn!(alert_id = %envelope.alert.alert_id, "no model available, deterministic-only triage");
                metrics::counter!("triage_no_model_total").increment(1);
                return None;
            }
            Err(e) => {
                warn!(alert_id = %envelope.alert.alert_id, error = %e, "model routing failed");
                return None;
            }
        };

        let prompt = build_prompt(
            &envelope.alert,
            envelope.enrichment.as_ref(),
            envelope.threat_summary.as_ref(),
            &envelope.iocs,
            similar,
        );

        let raw = match self.llm.complete(&model, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(alert_id = %envelope.alert.alert_id, model = %model.model_id, error = %e, "llm call failed");
                metrics::counter!("triage_llm_errors_total").increment(1);
                return None;
            }
        };

        match parse_analysis(&raw) {
            Some(analysis) => Some((model.model_id, analysis)),
            None => {
                warn!(
                    alert_id = %envelope.alert.alert_id,
                    model = %model.model_id,
                    "llm output unparseable, falling back to deterministic result"
                );
                metrics::counter!("triage_llm_parse_failures_total").increment(1);
                None
            }
        }
    }
}

fn data_err(e: &vigil_data::DataError) -> StageError {
    if e.is_retryable() {
        StageError::transient(e.to_string())
    } else {
        StageError::permanent(e.to_string())
    }
}

/// Classify a free-form IOC string from the LLM; junk is dropped
fn classify_ioc(raw: &str) -> Option<Ioc> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if value.parse::<std::net::IpAddr>().is_ok() {
        return Some(Ioc::new(value, IocType::Ip));
    }
    if let Some(t) = hash_type(value) {
        return Some(Ioc::new(value.to_lowercase(), t));
    }
    if is_valid_url(value) {
        return Some(Ioc::new(value, IocType::Url));
    }
    if is_valid_domain(value) {
        return Some(Ioc::new(value.to_lowercase(), IocType::Domain));
    }
    None
}

fn merge_actions(
    template: Vec<RecommendedAction>,
    llm_actions: &[String],
) -> Vec<RecommendedAction> {
    let mut merged = template;
    for action in llm_actions {
        let action = action.trim();
        if action.is_empty() {
            continue;
        }
        let duplicate = merged
            .iter()
            .any(|existing| existing.action.eq_ignore_ascii_case(action));
        if !duplicate {
            merged.push(RecommendedAction {
                action: action.to_string(),
                priority: ActionPriority::Medium,
                automatable: false,
                owner: None,
            });
        }
    }
    merged
}

fn key_findings(inputs: &ScoreInputs, similar_count: usize) -> Vec<String> {
    let mut findings = Vec::new();
    if let Some(score) = inputs.threat_score {
        if score > 0.0 {
            findings.push(format!("Threat intelligence aggregate score {score:.1}"));
        }
    }
    if let Some(criticality) = &inputs.asset_criticality {
        findings.push(format!("Affected asset criticality: {criticality}"));
    }
    if !inputs.vulnerabilities.is_empty() {
        findings.push(format!(
            "{} known vulnerabilit{} on the affected asset",
            inputs.vulnerabilities.len(),
            if inputs.vulnerabilities.len() == 1 { "y" } else { "ies" }
        ));
    }
    if similar_count > 0 {
        findings.push(format!("{similar_count} similar historical alerts"));
    }
    if inputs.hot_history {
        findings.push("Repeated high-risk activity on this asset or source".to_string());
    }
    findings
}

#[async_trait::async_trait]
impl StageHandler for TriageHandler {
    fn stage(&self) -> &'static str {
        "triage"
    }

    async fn handle(
        &self,
        mut envelope: AlertEnvelope,
        _meta: &MessageMeta,
    ) -> Result<StageOutcome, StageError> {
        let started = Instant::now();

        // Historical multiplier input; a failed count is a cold history,
        // not a failed triage
        let since = Utc::now() - ChronoDuration::days(30);
        let hot_history = match self
            .db
            .alerts()
            .recent_high_risk_count(
                envelope.alert.asset_id.as_deref(),
                envelope.alert.source_ip.map(|ip| ip.to_string()).as_deref(),
                since,
            )
            .await
        {
            Ok(count) => count >= HISTORY_THRESHOLD,
            Err(e) => {
                warn!(error = %e, "history count failed, skipping multiplier");
                false
            }
        };

        // Similar history under the sync budget
        let similar = self.similarity.similar_to(&envelope.alert).await;
        let similar_hits = similar.clone().unwrap_or_default();

        let inputs = ScoreInputs::from_message(
            envelope.alert.alert_type,
            envelope.alert.severity,
            envelope.enrichment.as_ref(),
            envelope.threat_summary.as_ref(),
            hot_history,
            similar.is_some(),
        );

        let risk_score = scoring::risk_score(&inputs);
        let mut confidence = scoring::confidence(&inputs);

        // LLM augmentation
        let llm = self.llm_analysis(&envelope, &inputs, &similar_hits).await;
        let (model_used, analysis) = match llm {
            Some((model, analysis)) => (model, analysis),
            None => {
                // A failed LLM pass drops trust under the review threshold
                confidence = (confidence * 0.5).min(0.45);
                ("fallback".to_string(), LlmAnalysis::default())
            }
        };

        // Merge: deterministic score is authoritative, LLM supplies judgment
        let risk_level = analysis
            .risk_level
            .unwrap_or_else(|| RiskLevel::from_score(risk_score));
        let analysis_text = analysis.reasoning.clone().unwrap_or_else(|| {
            format!(
                "Deterministic assessment: severity {} with threat score {:.1} on {} asset.",
                envelope.alert.severity,
                inputs.threat_score.unwrap_or(0.0),
                inputs.asset_criticality.as_deref().unwrap_or("unknown"),
            )
        });

        let template = TemplateKind::for_alert_type(envelope.alert.alert_type);
        let recommended_actions =
            merge_actions(template.default_actions(), &analysis.recommended_actions);

        let mut iocs_extracted = envelope.iocs.clone();
        for raw in &analysis.iocs {
            if let Some(ioc) = classify_ioc(raw) {
                if !iocs_extracted.contains(&ioc) {
                    iocs_extracted.push(ioc);
                }
            }
        }

        let requires_human_review = scoring::requires_human_review(
            risk_score,
            confidence,
            envelope.alert.alert_type,
        );

        let mut result = TriageResult {
            alert_id: envelope.alert.id,
            risk_score,
            risk_level,
            confidence,
            analysis_text,
            key_findings: key_findings(&inputs, similar_hits.len()),
            recommended_actions,
            iocs_extracted,
            model_used,
            processing_ms: started.elapsed().as_millis() as u64,
            result_version: 0,
            requires_human_review,
        };

        // Result row and alerts.risk_score land in one transaction
        result.result_version = self
            .db
            .triage()
            .upsert(&result)
            .await
            .map_err(|e| data_err(&e))?;

        metrics::histogram!("triage_risk_score").record(risk_score);
        if requires_human_review {
            metrics::counter!("triage_human_review_total").increment(1);
        }

        // Best-effort sync index; the alerts.result consumer is the backstop
        self.similarity
            .index(&envelope.alert, Some(result.risk_level))
            .await;

        debug!(
            alert_id = %envelope.alert.alert_id,
            risk_score,
            risk_level = %result.risk_level,
            confidence,
            model = %result.model_used,
            version = result.result_version,
            "triage complete"
        );

        envelope.alert.risk_score = Some(risk_score);
        envelope.triage = Some(result);
        Ok(StageOutcome::Forward(subjects::RESULT, Box::new(envelope)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ioc_shapes() {
        assert_eq!(
            classify_ioc("8.8.8.8"),
            Some(Ioc::new("8.8.8.8", IocType::Ip))
        );
        assert_eq!(
            classify_ioc("44D88612FEA8A8F36DE82E1278ABB02F"),
            Some(Ioc::new("44d88612fea8a8f36de82e1278abb02f", IocType::Md5))
        );
        assert_eq!(
            classify_ioc("https://evil.example.com/x"),
            Some(Ioc::new("https://evil.example.com/x", IocType::Url))
        );
        assert_eq!(
            classify_ioc("evil.example.com"),
            Some(Ioc::new("evil.example.com", IocType::Domain))
        );
        assert_eq!(classify_ioc("not an ioc at all"), None);
        assert_eq!(classify_ioc(""), None);
    }

    #[test]
    fn merge_actions_unions_without_duplicates() {
        let template = TemplateKind::Malware.default_actions();
        let template_len = template.len();
        let merged = merge_actions(
            template,
            &[
                "Isolate the affected host".to_string(), // duplicate of template
                "Rotate service credentials".to_string(),
                "".to_string(),
            ],
        );
        assert_eq!(merged.len(), template_len + 1);
        assert!(merged
            .iter()
            .any(|a| a.action == "Rotate service credentials"));
    }

    #[test]
    fn fallback_confidence_always_forces_review() {
        // Even a fully-populated signal set drops under 0.5 on LLM failure
        let full_confidence: f64 = 1.0;
        let degraded = (full_confidence * 0.5).min(0.45);
        assert!(degraded < 0.5);
    }
}
