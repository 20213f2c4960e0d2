//! Threat-intel stage handler

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use vigil_bus::{subjects, MessageMeta, StageError, StageHandler, StageOutcome};
use vigil_core::model::{Ioc, ThreatIntelRecord, ThreatLevel};
use vigil_core::AlertEnvelope;
use vigil_data::cache::{CachePool, CachePurpose};
use vigil_data::db::Db;

use crate::aggregate::{assess_ioc, summarize, SourceOutcome};
use crate::breaker::CircuitBreaker;
use crate::sources::{SourceError, SourceVerdict, ThreatSource};

pub struct IntelHandler {
    sources: Vec<Arc<dyn ThreatSource>>,
    breaker: CircuitBreaker,
    db: Db,
    cache: CachePool,
    cache_ttl_secs: u64,
}

impl IntelHandler {
    pub fn new(
        sources: Vec<Arc<dyn ThreatSource>>,
        db: Db,
        cache: CachePool,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            sources,
            breaker: CircuitBreaker::new(),
            db,
            cache,
            cache_ttl_secs,
        }
    }

    fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// One (source, IOC) query with breaker short-circuit and 24h caching
    async fn query_one(&self, source: &Arc<dyn ThreatSource>, ioc: &Ioc) -> SourceOutcome {
        let name = source.name().to_string();
        let silent = SourceOutcome {
            source: name.clone(),
            weight: source.weight(),
            score: None,
            raw: None,
        };

        if self.breaker.is_open(&name) {
            debug!(source = %name, ioc = %ioc.value, "circuit open, skipping source");
            metrics::counter!("intel_circuit_skips_total").increment(1);
            return silent;
        }

        let cache_key = format!("{}:{}:{}", name, ioc.ioc_type, ioc.value);
        if let Ok(Some(verdict)) = self
            .cache
            .get_json::<SourceVerdict>(CachePurpose::ThreatIntel, &cache_key)
            .await
        {
            metrics::counter!("intel_cache_hits_total").increment(1);
            return SourceOutcome {
                score: Some(verdict.score),
                raw: Some(verdict.raw),
                ..silent
            };
        }

        match source.query(ioc).await {
            Ok(verdict) => {
                self.breaker.record_success(&name);
                if let Err(e) = self
                    .cache
                    .set_json(
                        CachePurpose::ThreatIntel,
                        &cache_key,
                        &verdict,
                        self.cache_ttl_secs,
                    )
                    .await
                {
                    debug!(source = %name, error = %e, "intel cache write failed");
                }
                SourceOutcome {
                    score: Some(verdict.score),
                    raw: Some(verdict.raw),
                    ..silent
                }
            }
            Err(SourceError::TimedOut) => {
                metrics::counter!("intel_source_timeouts_total", "source" => name.clone())
                    .increment(1);
                silent
            }
            Err(e) => {
                warn!(source = %name, ioc = %ioc.value, error = %e, "threat source failed");
                metrics::counter!("intel_source_errors_total", "source" => name.clone())
                    .increment(1);
                self.breaker.record_failure(&name);
                silent
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

#[async_trait::async_trait]
impl StageHandler for IntelHandler {
    fn stage(&self) -> &'static str {
        "intel"
    }

    async fn handle(
        &self,
        mut envelope: AlertEnvelope,
        _meta: &MessageMeta,
    ) -> Result<StageOutcome, StageError> {
        let queried = self.source_names();
        let configured = self.sources.len();

        // Every (IOC, source) pair in flight at once; per-source budgets
        // bound the join
        let per_ioc = join_all(envelope.iocs.iter().map(|ioc| async {
            let outcomes =
                join_all(self.sources.iter().map(|source| self.query_one(source, ioc))).await;
            (ioc.clone(), outcomes)
        }))
        .await;

        let mut assessments = Vec::with_capacity(per_ioc.len());
        for (ioc, outcomes) in per_ioc {
            let mut raw_vendor_data = serde_json::Map::new();
            for outcome in &outcomes {
                if let Some(raw) = &outcome.raw {
                    raw_vendor_data.insert(outcome.source.clone(), raw.clone());
                }
            }
            let assessment = assess_ioc(ioc, &outcomes, configured);

            // Threat level clean with nobody answering is not worth a row
            if !assessment.sources_hit.is_empty()
                || assessment.threat_level != ThreatLevel::Clean
            {
                let record = ThreatIntelRecord {
                    ioc: assessment.ioc.value.clone(),
                    ioc_type: assessment.ioc.ioc_type,
                    threat_level: assessment.threat_level,
                    threat_score: assessment.score,
                    sources_queried: queried.clone(),
                    sources_hit: assessment.sources_hit.clone(),
                    last_seen: Utc::now(),
                    raw_vendor_data: serde_json::Value::Object(raw_vendor_data),
                };
                self.db
                    .intel()
                    .upsert(&record)
                    .await
                    .map_err(|e| data_err(&e))?;
            }
            assessments.push(assessment);
        }

        let summary = summarize(assessments, queried);
        metrics::histogram!("intel_aggregate_score").record(summary.score);
        envelope.threat_summary = Some(summary);

        Ok(StageOutcome::Forward(
            subjects::CONTEXTUALIZED,
            Box::new(envelope),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::StaticThreatSource;
    use std::time::Duration;

    fn sources_all_timing_out() -> Vec<Arc<dyn ThreatSource>> {
        vec![
            Arc::new(
                StaticThreatSource::new("virustotal", 0.4, Some(SourceVerdict::clean()))
                    .with_delay(Duration::from_secs(60), Duration::from_millis(50)),
            ),
            Arc::new(
                StaticThreatSource::new("otx", 0.3, Some(SourceVerdict::clean()))
                    .with_delay(Duration::from_secs(60), Duration::from_millis(50)),
            ),
            Arc::new(
                StaticThreatSource::new("abusech", 0.3, Some(SourceVerdict::clean()))
                    .with_delay(Duration::from_secs(60), Duration::from_millis(50)),
            ),
        ]
    }

    // The full handler path needs DB and cache; the outcome math is covered
    // through the source/aggregate layers.
    #[tokio::test]
    async fn all_sources_timing_out_yield_silent_outcomes() {
        use vigil_core::model::IocType;

        let sources = sources_all_timing_out();
        let ioc = Ioc::new("8.8.8.8", IocType::Ip);
        let outcomes = join_all(sources.iter().map(|s| async {
            match s.query(&ioc).await {
                Ok(v) => SourceOutcome {
                    source: s.name().to_string(),
                    weight: s.weight(),
                    score: Some(v.score),
                    raw: Some(v.raw),
                },
                Err(_) => SourceOutcome {
                    source: s.name().to_string(),
                    weight: s.weight(),
                    score: None,
                    raw: None,
                },
            }
        }))
        .await;

        let assessment = assess_ioc(ioc, &outcomes, sources.len());
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.confidence, 0.0);
        assert!(assessment.sources_hit.is_empty());

        let summary = summarize(vec![assessment], vec!["virustotal".into(), "otx".into(), "abusech".into()]);
        assert_eq!(summary.threat_level, ThreatLevel::Clean);
        assert_eq!(summary.confidence, 0.0);
        assert!(summary.sources_hit.is_empty());
    }
}
