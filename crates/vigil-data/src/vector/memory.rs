//! In-memory vector index
//!
//! Linear-scan cosine search over a concurrent map. The mock-friendly core
//! backend; adequate for test and single-node deployments.

use dashmap::DashMap;
use uuid::Uuid;

use crate::Result;

use super::{
    cosine_similarity, IndexStats, SearchFilter, SearchHit, VectorEntry, VectorIndex,
    EMBEDDING_DIM,
};

pub struct InMemoryVectorIndex {
    entries: DashMap<Uuid, VectorEntry>,
    dimension: usize,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: DashMap::new(),
            dimension,
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        if entry.embedding.len() != self.dimension {
            return Err(crate::DataError::Vector(format!(
                "embedding dimension {} != index dimension {}",
                entry.embedding.len(),
                self.dimension
            )));
        }
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| SearchHit {
                id: entry.id,
                similarity: cosine_similarity(query, &entry.embedding),
                metadata: entry.metadata.clone(),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.entries.remove(&id).is_some())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            entries: self.entries.len() as u64,
            dimension: self.dimension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorMetadata;
    use chrono::Utc;
    use vigil_core::model::{AlertType, RiskLevel, Severity};

    fn entry(id: Uuid, embedding: Vec<f32>, alert_type: AlertType) -> VectorEntry {
        VectorEntry {
            id,
            embedding,
            metadata: VectorMetadata {
                alert_type,
                severity: Severity::High,
                risk_level: Some(RiskLevel::High),
                timestamp: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_search_delete() {
        let index = InMemoryVectorIndex::new(3);
        let id = Uuid::new_v4();
        index
            .upsert(entry(id, vec![1.0, 0.0, 0.0], AlertType::Malware))
            .await
            .unwrap();
        index
            .upsert(entry(
                Uuid::new_v4(),
                vec![0.0, 1.0, 0.0],
                AlertType::Phishing,
            ))
            .await
            .unwrap();

        let hits = index
            .search(&[1.0, 0.0, 0.0], 5, 0.7, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert!(hits[0].similarity > 0.99);

        assert!(index.delete(id).await.unwrap());
        assert!(!index.delete(id).await.unwrap());
        assert_eq!(index.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn threshold_filters_weak_matches() {
        let index = InMemoryVectorIndex::new(2);
        index
            .upsert(entry(Uuid::new_v4(), vec![1.0, 0.0], AlertType::Malware))
            .await
            .unwrap();

        // Orthogonal query: similarity 0, below any threshold
        let hits = index
            .search(&[0.0, 1.0], 5, 0.7, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn metadata_filter_applies() {
        let index = InMemoryVectorIndex::new(2);
        index
            .upsert(entry(Uuid::new_v4(), vec![1.0, 0.0], AlertType::Malware))
            .await
            .unwrap();

        let filter = SearchFilter {
            alert_type: Some(AlertType::Phishing),
            ..Default::default()
        };
        let hits = index.search(&[1.0, 0.0], 5, 0.0, &filter).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::new(3);
        let result = index
            .upsert(entry(Uuid::new_v4(), vec![1.0, 0.0], AlertType::Malware))
            .await;
        assert!(result.is_err());
    }
}
