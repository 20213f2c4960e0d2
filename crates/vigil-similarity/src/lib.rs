//! Similarity search service
//!
//! Maintains the embedding index of past alerts and answers top-K cosine
//! queries with metadata filters. Indexing happens synchronously when the
//! triage agent calls in, and asynchronously off `alerts.result` as the
//! fallback path. Consistency is eventual; callers must not depend on
//! read-your-write.

pub mod embed;
pub mod http;
pub mod indexer;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use vigil_core::model::{Alert, AlertType, RiskLevel, Severity, SimilarAlert};
use vigil_data::vector::{SearchFilter, VectorEntry, VectorIndex, VectorMetadata};

use embed::{EmbedError, Embedder};

#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("index error: {0}")]
    Index(String),
}

impl From<vigil_data::DataError> for SimilarityError {
    fn from(e: vigil_data::DataError) -> Self {
        Self::Index(e.to_string())
    }
}

/// Index request: the alert projection plus triage metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub alert_uuid: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub observables: Vec<String>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    pub timestamp: DateTime<Utc>,
}

impl IndexRequest {
    pub fn from_alert(alert: &Alert, risk_level: Option<RiskLevel>) -> Self {
        Self {
            alert_uuid: alert.id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            description: alert.description.clone(),
            observables: observables_of(alert),
            risk_level,
            timestamp: alert.timestamp,
        }
    }
}

/// Search request: either free text or an alert-shaped projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_similarity: Option<f64>,
    #[serde(default)]
    pub filter: SearchFilter,
}

fn observables_of(alert: &Alert) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(ip) = alert.source_ip {
        out.push(ip.to_string());
    }
    if let Some(ip) = alert.target_ip {
        out.push(ip.to_string());
    }
    if let Some(hash) = &alert.file_hash {
        out.push(hash.clone());
    }
    if let Some(url) = &alert.url {
        out.push(url.clone());
    }
    if let Some(process) = &alert.process_name {
        out.push(process.clone());
    }
    out
}

/// Canonical text projection fed to the embedder
pub fn canonical_projection(
    alert_type: AlertType,
    severity: Severity,
    description: &str,
    observables: &[String],
) -> String {
    let mut parts = vec![
        alert_type.as_str().to_string(),
        severity.as_str().to_string(),
        description.to_string(),
    ];
    parts.extend(observables.iter().cloned());
    parts.join(" ")
}

pub struct SimilarityService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    default_min_similarity: f64,
}

impl SimilarityService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        default_min_similarity: f64,
    ) -> Self {
        Self {
            embedder,
            index,
            default_min_similarity,
        }
    }

    pub async fn index(&self, request: &IndexRequest) -> Result<(), SimilarityError> {
        let text = canonical_projection(
            request.alert_type,
            request.severity,
            &request.description,
            &request.observables,
        );
        let embedding = self.embedder.embed(&text).await?;
        self.index
            .upsert(VectorEntry {
                id: request.alert_uuid,
                embedding,
                metadata: VectorMetadata {
                    alert_type: request.alert_type,
                    severity: request.severity,
                    risk_level: request.risk_level,
                    timestamp: request.timestamp,
                },
            })
            .await?;
        metrics::counter!("similarity_indexed_total").increment(1);
        Ok(())
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SimilarAlert>, SimilarityError> {
        let embedding = self.embedder.embed(&request.text).await?;
        let hits = self
            .index
            .search(
                &embedding,
                request.top_k.unwrap_or(3),
                request.min_similarity.unwrap_or(self.default_min_similarity),
                &request.filter,
            )
            .await?;
        metrics::counter!("similarity_searches_total").increment(1);

        Ok(hits
            .into_iter()
            .map(|hit| SimilarAlert {
                alert_uuid: hit.id,
                similarity: hit.similarity,
                alert_type: hit.metadata.alert_type,
                severity: hit.metadata.severity,
                risk_level: hit.metadata.risk_level,
                timestamp: hit.metadata.timestamp,
            })
            .collect())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, SimilarityError> {
        Ok(self.index.delete(id).await?)
    }

    pub async fn stats(&self) -> Result<vigil_data::vector::IndexStats, SimilarityError> {
        Ok(self.index.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embed::HashEmbedder;
    use vigil_data::vector::InMemoryVectorIndex;

    fn service() -> SimilarityService {
        SimilarityService::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorIndex::default()),
            0.7,
        )
    }

    fn index_request(description: &str) -> IndexRequest {
        IndexRequest {
            alert_uuid: Uuid::new_v4(),
            alert_type: AlertType::Malware,
            severity: Severity::High,
            description: description.to_string(),
            observables: vec!["192.0.2.10".to_string()],
            risk_level: Some(RiskLevel::High),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn indexed_alert_is_findable_by_same_projection() {
        let service = service();
        let request = index_request("EICAR test file detected on host");
        service.index(&request).await.unwrap();

        let hits = service
            .search(&SearchRequest {
                text: canonical_projection(
                    request.alert_type,
                    request.severity,
                    &request.description,
                    &request.observables,
                ),
                top_k: Some(3),
                min_similarity: None,
                filter: SearchFilter::default(),
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].alert_uuid, request.alert_uuid);
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn unrelated_text_stays_under_threshold() {
        let service = service();
        service
            .index(&index_request("EICAR test file detected on host"))
            .await
            .unwrap();

        let hits = service
            .search(&SearchRequest {
                text: "completely unrelated billing paperwork reminder".to_string(),
                top_k: Some(3),
                min_similarity: None,
                filter: SearchFilter::default(),
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let service = service();
        let request = index_request("suspicious outbound transfer");
        service.index(&request).await.unwrap();
        assert!(service.delete(request.alert_uuid).await.unwrap());
        assert_eq!(service.stats().await.unwrap().entries, 0);
    }
}
