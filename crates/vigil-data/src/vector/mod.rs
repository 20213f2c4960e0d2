//! Vector index capability
//!
//! Derived from committed alerts; eventually consistent. The in-memory
//! implementation ships in core; LanceDB backs the `vector-db` feature.

pub mod memory;

#[cfg(feature = "vector-db")]
pub mod lance;

pub use memory::InMemoryVectorIndex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_core::model::{AlertType, RiskLevel, Severity};

use crate::Result;

/// Default embedding dimension (sentence-transformer class)
pub const EMBEDDING_DIM: usize = 384;

/// Metadata stored alongside each embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub alert_type: AlertType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    pub timestamp: DateTime<Utc>,
}

/// One indexed alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Metadata filter applied to a search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<AlertType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl SearchFilter {
    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        if let Some(t) = self.alert_type {
            if metadata.alert_type != t {
                return false;
            }
        }
        if let Some(s) = self.severity {
            if metadata.severity != s {
                return false;
            }
        }
        if let Some(r) = self.risk_level {
            if metadata.risk_level != Some(r) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if metadata.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if metadata.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub similarity: f64,
    pub metadata: VectorMetadata,
}

/// Index stats for the /stats surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: u64,
    pub dimension: usize,
}

/// Vector store capability; concrete backends and test doubles share it
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, entry: VectorEntry) -> Result<()>;

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Returns true when an entry was removed
    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn stats(&self) -> Result<IndexStats>;
}

/// Cosine similarity of two equal-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        let a = vec![1.0f32, 0.0, 0.0];
        let b = vec![1.0f32, 0.0, 0.0];
        let c = vec![0.0f32, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &c).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn filter_matching() {
        let meta = VectorMetadata {
            alert_type: AlertType::Malware,
            severity: Severity::High,
            risk_level: Some(RiskLevel::High),
            timestamp: Utc::now(),
        };
        assert!(SearchFilter::default().matches(&meta));
        let filter = SearchFilter {
            alert_type: Some(AlertType::Phishing),
            ..Default::default()
        };
        assert!(!filter.matches(&meta));
        let filter = SearchFilter {
            risk_level: Some(RiskLevel::High),
            until: Some(Utc::now() + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(filter.matches(&meta));
    }
}
