//! Ingest core: persist before publish
//!
//! The broker is not the system of record. A row must exist before any
//! message does; a failed publish leaves the row behind for the startup
//! reconciler to re-emit.

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use vigil_bus::{subjects, Bus, BusError, MessageMeta};
use vigil_core::model::Alert;
use vigil_core::AlertEnvelope;
use vigil_data::db::Db;
use vigil_data::DataError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("database failure: {0}")]
    Database(#[from] DataError),
    /// Row persisted, publish failed; the reconciler will re-emit
    #[error("broker failure after persist: {0}")]
    Broker(#[from] BusError),
}

/// Receipt returned to the caller
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReceipt {
    pub ingestion_id: Uuid,
    pub alert_id: String,
    pub status: &'static str,
}

pub struct IngestService {
    db: Db,
    bus: Bus,
}

impl IngestService {
    pub fn new(db: Db, bus: Bus) -> Self {
        Self { db, bus }
    }

    /// Persist the canonical row, then publish to the raw subject.
    pub async fn ingest(&self, alert: Alert) -> Result<IngestReceipt, IngestError> {
        self.db.alerts().insert(&alert).await?;

        // Birth of the row is a status change too
        if let Err(e) = self
            .db
            .audit()
            .append(alert.id, None, alert.status.as_str(), "ingestor", None)
            .await
        {
            warn!(alert_id = %alert.alert_id, error = %e, "audit append failed");
        }

        self.publish(&alert).await?;
        metrics::counter!("ingestor_accepted_total").increment(1);

        Ok(IngestReceipt {
            ingestion_id: alert.id,
            alert_id: alert.alert_id,
            status: "queued",
        })
    }

    async fn publish(&self, alert: &Alert) -> Result<(), BusError> {
        let meta = MessageMeta::new(&alert.alert_id, alert.severity.priority());
        let envelope = AlertEnvelope::new(alert.clone());
        self.bus.publish(subjects::RAW, &meta, &envelope).await?;

        if let Err(e) = self.db.alerts().mark_published(alert.id).await {
            // Worst case the reconciler re-emits and S2 dedups
            warn!(alert_id = %alert.alert_id, error = %e, "mark_published failed");
        }
        Ok(())
    }

    /// Re-emit alerts that were persisted but never made it to the broker.
    /// Runs at startup; S2's fingerprint dedup absorbs any overlap.
    pub async fn reconcile(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(60);
        let stranded = match self.db.alerts().unpublished(cutoff, 1000).await {
            Ok(stranded) => stranded,
            Err(e) => {
                warn!(error = %e, "reconciler query failed");
                return 0;
            }
        };

        let mut recovered = 0;
        for alert in stranded {
            match self.publish(&alert).await {
                Ok(()) => recovered += 1,
                Err(e) => {
                    warn!(alert_id = %alert.alert_id, error = %e, "reconcile publish failed");
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "reconciler re-emitted stranded alerts");
            metrics::counter!("ingestor_reconciled_total").increment(recovered as u64);
        }
        recovered
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}
