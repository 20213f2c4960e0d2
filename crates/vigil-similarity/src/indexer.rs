//! Async indexing off `alerts.result`
//!
//! Fallback path: when the triage agent's synchronous index call misses its
//! budget, the entry still lands here once the result message arrives.

use std::sync::Arc;

use tracing::debug;

use vigil_bus::{MessageMeta, StageError, StageHandler, StageOutcome};
use vigil_core::AlertEnvelope;

use crate::{IndexRequest, SimilarityService};

pub struct ResultIndexHandler {
    service: Arc<SimilarityService>,
}

impl ResultIndexHandler {
    pub fn new(service: Arc<SimilarityService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl StageHandler for ResultIndexHandler {
    fn stage(&self) -> &'static str {
        "similarity_indexer"
    }

    async fn handle(
        &self,
        envelope: AlertEnvelope,
        meta: &MessageMeta,
    ) -> Result<StageOutcome, StageError> {
        let risk_level = envelope.triage.as_ref().map(|t| t.risk_level);
        let request = IndexRequest::from_alert(&envelope.alert, risk_level);

        // Upsert keyed by alert UUID: a sync-indexed alert re-indexing here
        // is a harmless overwrite, not a duplicate.
        self.service
            .index(&request)
            .await
            .map_err(|e| StageError::transient(e.to_string()))?;

        debug!(
            alert_id = %meta.alert_id,
            alert_uuid = %request.alert_uuid,
            "indexed triaged alert"
        );
        Ok(StageOutcome::Done)
    }
}
