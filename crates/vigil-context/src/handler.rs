//! Context collector stage handler

use std::time::Duration;

use tokio::time::timeout;

use vigil_bus::{subjects, MessageMeta, StageError, StageHandler, StageOutcome};
use vigil_core::envelope::EnrichmentSection;
use vigil_core::model::{Alert, ContextType, EnrichmentContext};
use vigil_core::AlertEnvelope;
use vigil_data::db::Db;

use crate::collectors::Collectors;

pub struct ContextHandler {
    collectors: Collectors,
    db: Db,
    join_timeout: Duration,
}

impl ContextHandler {
    pub fn new(collectors: Collectors, db: Db, join_timeout: Duration) -> Self {
        Self {
            collectors,
            db,
            join_timeout,
        }
    }

    /// A timed-out applicable sub-collector yields a partial row; an
    /// inapplicable one yields nothing.
    fn settle(
        &self,
        result: Result<Option<EnrichmentContext>, tokio::time::error::Elapsed>,
        applicable: bool,
        context_type: ContextType,
    ) -> Option<EnrichmentContext> {
        match result {
            Ok(row) => row,
            Err(_) if applicable => {
                metrics::counter!("context_subcollector_timeouts_total").increment(1);
                Some(self.collectors.partial(context_type))
            }
            Err(_) => None,
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

fn network_applicable(alert: &Alert) -> bool {
    alert.source_ip.is_some() || alert.target_ip.is_some()
}

#[async_trait::async_trait]
impl StageHandler for ContextHandler {
    fn stage(&self) -> &'static str {
        "context"
    }

    async fn handle(
        &self,
        mut envelope: AlertEnvelope,
        _meta: &MessageMeta,
    ) -> Result<StageOutcome, StageError> {
        let alert = &envelope.alert;

        // The three sub-collectors run concurrently under one joint budget;
        // a slow provider degrades its own row, never the stage.
        let (network, asset, user) = tokio::join!(
            timeout(self.join_timeout, self.collectors.network(alert)),
            timeout(self.join_timeout, self.collectors.asset(alert)),
            timeout(self.join_timeout, self.collectors.user(alert)),
        );

        let section = EnrichmentSection {
            network: self.settle(network, network_applicable(alert), ContextType::Network),
            asset: self.settle(asset, alert.asset_id.is_some(), ContextType::Asset),
            user: self.settle(user, alert.user_id.is_some(), ContextType::User),
        };

        for row in [&section.network, &section.asset, &section.user]
            .into_iter()
            .flatten()
        {
            self.db
                .context()
                .upsert(envelope.alert.id, row)
                .await
                .map_err(|e| data_err(&e))?;
        }

        envelope.enrichment = Some(section);
        Ok(StageOutcome::Forward(subjects::ENRICHED, Box::new(envelope)))
    }
}
