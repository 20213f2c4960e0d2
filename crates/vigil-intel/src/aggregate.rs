//! Weighted score aggregation
//!
//! aggregate = sum(weight_i * score_i) / sum(weight_i over responders).
//! Dividing by the responding weight renormalizes automatically when sources
//! are disabled or silent; score ordering between fully-answered alerts is
//! unaffected by which sources exist.

use vigil_core::model::{Ioc, IocAssessment, ThreatLevel, ThreatSummary};

/// One source's contribution to one IOC
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub weight: f64,
    /// None when the source timed out, errored, or sat in cooldown
    pub score: Option<f64>,
    /// Vendor body kept for the persisted record
    pub raw: Option<serde_json::Value>,
}

/// Aggregate one IOC across its source outcomes.
/// `configured` is the number of enabled sources, for the confidence ratio.
pub fn assess_ioc(ioc: Ioc, outcomes: &[SourceOutcome], configured: usize) -> IocAssessment {
    let responding: Vec<&SourceOutcome> =
        outcomes.iter().filter(|o| o.score.is_some()).collect();

    let weight_sum: f64 = responding.iter().map(|o| o.weight).sum();
    let score = if weight_sum > 0.0 {
        responding
            .iter()
            .map(|o| o.weight * o.score.unwrap_or(0.0))
            .sum::<f64>()
            / weight_sum
    } else {
        0.0
    };

    let confidence = if configured > 0 {
        responding.len() as f64 / configured as f64
    } else {
        0.0
    };

    IocAssessment {
        ioc,
        score,
        threat_level: ThreatLevel::from_score(score),
        confidence,
        sources_hit: responding.iter().map(|o| o.source.clone()).collect(),
    }
}

/// Roll per-IOC assessments into the alert-level summary. One hot indicator
/// is enough to make the alert hot, so the summary takes the max.
pub fn summarize(
    assessments: Vec<IocAssessment>,
    sources_queried: Vec<String>,
) -> ThreatSummary {
    if assessments.is_empty() {
        return ThreatSummary::empty(sources_queried);
    }

    let score = assessments
        .iter()
        .map(|a| a.score)
        .fold(0.0f64, f64::max);
    let confidence = assessments.iter().map(|a| a.confidence).sum::<f64>()
        / assessments.len() as f64;

    let mut sources_hit: Vec<String> = assessments
        .iter()
        .flat_map(|a| a.sources_hit.iter().cloned())
        .collect();
    sources_hit.sort();
    sources_hit.dedup();

    ThreatSummary {
        score,
        threat_level: ThreatLevel::from_score(score),
        confidence,
        iocs: assessments,
        sources_queried,
        sources_hit,
    }
}
