//! Similarity service client
//!
//! Synchronous calls under a tight budget. A miss degrades the history
//! signal; it never fails triage. Indexing that misses the budget is
//! recovered by the similarity service's own `alerts.result` consumer.

use std::time::Duration;

use tracing::debug;

use vigil_core::model::{Alert, RiskLevel, SimilarAlert};

pub struct SimilarityClient {
    client: reqwest::Client,
    base_url: String,
    budget: Duration,
    top_k: usize,
}

impl SimilarityClient {
    pub fn new(base_url: impl Into<String>, budget: Duration, top_k: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            budget,
            top_k,
        }
    }

    fn projection(alert: &Alert) -> String {
        let mut parts = vec![
            alert.alert_type.as_str().to_string(),
            alert.severity.as_str().to_string(),
            alert.description.clone(),
        ];
        if let Some(ip) = alert.source_ip {
            parts.push(ip.to_string());
        }
        if let Some(ip) = alert.target_ip {
            parts.push(ip.to_string());
        }
        if let Some(hash) = &alert.file_hash {
            parts.push(hash.clone());
        }
        if let Some(url) = &alert.url {
            parts.push(url.clone());
        }
        if let Some(process) = &alert.process_name {
            parts.push(process.clone());
        }
        parts.join(" ")
    }

    /// Top-K similar history. None when the service missed the budget: the
    /// caller proceeds without the history signal.
    pub async fn similar_to(&self, alert: &Alert) -> Option<Vec<SimilarAlert>> {
        let url = format!("{}/api/v1/search", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "text": Self::projection(alert),
            "top_k": self.top_k,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.budget)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "similarity search refused");
            return None;
        }

        let parsed: serde_json::Value = response.json().await.ok()?;
        let hits: Vec<SimilarAlert> =
            serde_json::from_value(parsed.get("data")?.clone()).ok()?;

        // The query alert may already be indexed from a prior attempt
        Some(
            hits.into_iter()
                .filter(|hit| hit.alert_uuid != alert.id)
                .collect(),
        )
    }

    /// Best-effort synchronous index; the async path covers failures
    pub async fn index(&self, alert: &Alert, risk_level: Option<RiskLevel>) {
        let url = format!("{}/api/v1/index", self.base_url.trim_end_matches('/'));
        let mut observables = Vec::new();
        if let Some(ip) = alert.source_ip {
            observables.push(ip.to_string());
        }
        if let Some(ip) = alert.target_ip {
            observables.push(ip.to_string());
        }
        if let Some(hash) = &alert.file_hash {
            observables.push(hash.clone());
        }
        if let Some(u) = &alert.url {
            observables.push(u.clone());
        }
        if let Some(p) = &alert.process_name {
            observables.push(p.clone());
        }

        let body = serde_json::json!({
            "alert_uuid": alert.id,
            "alert_type": alert.alert_type,
            "severity": alert.severity,
            "description": alert.description,
            "observables": observables,
            "risk_level": risk_level,
            "timestamp": alert.timestamp,
        });

        let result = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.budget)
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, "sync index call missed budget, async indexer will cover");
            metrics::counter!("triage_sync_index_misses_total").increment(1);
        }
    }
}
