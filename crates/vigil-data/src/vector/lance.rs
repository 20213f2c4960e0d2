//! LanceDB-backed vector index (`vector-db` feature)

use std::path::Path;
use std::sync::Arc;

use arrow_array::{Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::connect;
use lancedb::query::{ExecutableQuery, QueryBase};
use uuid::Uuid;

use crate::{DataError, Result};

use super::{IndexStats, SearchFilter, SearchHit, VectorEntry, VectorIndex, VectorMetadata};

const TABLE: &str = "alerts";

pub struct LanceVectorIndex {
    db: lancedb::Connection,
    dimension: usize,
}

impl LanceVectorIndex {
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path
            .as_ref()
            .to_str()
            .ok_or_else(|| DataError::Vector("non-utf8 store path".to_string()))?;
        let db = connect(path)
            .execute()
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;

        let index = Self { db, dimension };
        index.ensure_table().await?;
        Ok(index)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let tables = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;

        if !tables.contains(&TABLE.to_string()) {
            let schema = self.schema();
            let empty = RecordBatch::new_empty(schema.clone());
            let reader = RecordBatchIterator::new([empty].into_iter().map(Ok), schema);
            self.db
                .create_table(TABLE, Box::new(reader))
                .execute()
                .await
                .map_err(|e| DataError::Vector(e.to_string()))?;
        }
        Ok(())
    }

    async fn table(&self) -> Result<lancedb::Table> {
        self.db
            .open_table(TABLE)
            .execute()
            .await
            .map_err(|e| DataError::Vector(e.to_string()))
    }
}

#[async_trait::async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        if entry.embedding.len() != self.dimension {
            return Err(DataError::Vector(format!(
                "embedding dimension {} != index dimension {}",
                entry.embedding.len(),
                self.dimension
            )));
        }
        let table = self.table().await?;

        // Delete-then-add keeps the id unique; LanceDB has no native upsert
        table
            .delete(&format!("id = '{}'", entry.id))
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;

        let schema = self.schema();
        let id_array = StringArray::from(vec![entry.id.to_string()]);
        let metadata_array =
            StringArray::from(vec![serde_json::to_string(&entry.metadata)?]);
        let embedding_values = Float32Array::from(entry.embedding);
        let embedding_array = arrow_array::FixedSizeListArray::try_new_from_values(
            embedding_values,
            self.dimension as i32,
        )
        .map_err(|e| DataError::Vector(e.to_string()))?;

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(id_array),
                Arc::new(embedding_array),
                Arc::new(metadata_array),
            ],
        )
        .map_err(|e| DataError::Vector(e.to_string()))?;

        let reader = RecordBatchIterator::new([batch].into_iter().map(Ok), schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let table = self.table().await?;

        // Over-fetch so post-filtering on metadata still fills top_k
        let fetch = top_k.saturating_mul(4).max(top_k);
        let batches: Vec<RecordBatch> = table
            .vector_search(query.to_vec())
            .map_err(|e| DataError::Vector(e.to_string()))?
            .limit(fetch)
            .execute()
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let metadatas = batch
                .column_by_name("metadata")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

            if let (Some(ids), Some(metadatas), Some(distances)) = (ids, metadatas, distances) {
                for i in 0..batch.num_rows() {
                    let Ok(id) = ids.value(i).parse::<Uuid>() else {
                        continue;
                    };
                    let Ok(metadata) =
                        serde_json::from_str::<VectorMetadata>(metadatas.value(i))
                    else {
                        continue;
                    };
                    // L2 over unit vectors: d^2 = 2(1 - cos)
                    let similarity = 1.0 - f64::from(distances.value(i)) / 2.0;
                    if similarity >= min_similarity && filter.matches(&metadata) {
                        hits.push(SearchHit {
                            id,
                            similarity,
                            metadata,
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let table = self.table().await?;
        table
            .delete(&format!("id = '{id}'"))
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;
        Ok(true)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let table = self.table().await?;
        let entries = table
            .count_rows(None)
            .await
            .map_err(|e| DataError::Vector(e.to_string()))?;
        Ok(IndexStats {
            entries: entries as u64,
            dimension: self.dimension,
        })
    }
}
