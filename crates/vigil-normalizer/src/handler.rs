//! Normalizer stage handler

use tracing::{debug, warn};

use vigil_bus::{subjects, MessageMeta, StageError, StageHandler, StageOutcome};
use vigil_core::model::AlertStatus;
use vigil_core::AlertEnvelope;
use vigil_data::cache::CachePool;
use vigil_data::db::Db;

use crate::formats::{self, VendorFields};
use crate::{fingerprint, ioc};

/// Delay before the single unparseable-payload retry
const PARSE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub struct NormalizerHandler {
    db: Db,
    cache: CachePool,
    window_secs: u64,
}

impl NormalizerHandler {
    pub fn new(db: Db, cache: CachePool, window_secs: u64) -> Self {
        Self {
            db,
            cache,
            window_secs,
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

fn apply_vendor_fields(alert: &mut vigil_core::model::Alert, fields: VendorFields) {
    if let Some(v) = fields.alert_type {
        alert.alert_type = v;
    }
    if let Some(v) = fields.severity {
        alert.severity = v;
    }
    if let Some(v) = fields.description {
        alert.description = v;
    }
    if let Some(v) = fields.timestamp {
        alert.timestamp = v;
    }
    if fields.source_ip.is_some() {
        alert.source_ip = fields.source_ip;
    }
    if fields.target_ip.is_some() {
        alert.target_ip = fields.target_ip;
    }
    if fields.file_hash.is_some() {
        alert.file_hash = fields.file_hash;
    }
    if fields.url.is_some() {
        alert.url = fields.url;
    }
    if fields.asset_id.is_some() {
        alert.asset_id = fields.asset_id;
    }
    if fields.user_id.is_some() {
        alert.user_id = fields.user_id;
    }
    if fields.process_name.is_some() {
        alert.process_name = fields.process_name;
    }
}

#[async_trait::async_trait]
impl StageHandler for NormalizerHandler {
    fn stage(&self) -> &'static str {
        "normalizer"
    }

    async fn handle(
        &self,
        mut envelope: AlertEnvelope,
        meta: &MessageMeta,
    ) -> Result<StageOutcome, StageError> {
        // Vendor dispatch over the raw payload
        match formats::normalize(&envelope.alert.source, &envelope.alert.raw_payload) {
            Ok(fields) => apply_vendor_fields(&mut envelope.alert, fields),
            Err(e) => {
                return Err(StageError::transient(e.to_string())
                    .with_retry_budget(1, PARSE_RETRY_DELAY));
            }
        }

        // IOC extraction, deduplicated within the alert
        envelope.iocs = ioc::extract(&envelope.alert);
        metrics::counter!("normalizer_iocs_extracted_total")
            .increment(envelope.iocs.len() as u64);

        // Fingerprint and persist it
        let fp = fingerprint::compute(&envelope.alert, self.window_secs);
        envelope.alert.fingerprint = Some(fp.clone());
        self.db
            .alerts()
            .set_fingerprint(envelope.alert.id, &fp)
            .await
            .map_err(|e| data_err(&e))?;

        // Cache is authoritative for dedup; the DB answers when it is down.
        // The claim is keyed to this alert's UUID so a broker redelivery of
        // the same message (after a transient forward failure) still counts
        // as the first sighting and gets forwarded.
        let owner = envelope.alert.id.to_string();
        let first_sighting = match self
            .cache
            .dedup_claim(&fp, &owner, self.window_secs)
            .await
        {
            Ok(first) => first,
            Err(e) => {
                warn!(error = %e, "dedup cache unavailable, falling back to DB");
                let since =
                    chrono::Utc::now() - chrono::Duration::seconds(self.window_secs as i64);
                !self
                    .db
                    .alerts()
                    .fingerprint_seen_since(&fp, since, envelope.alert.id)
                    .await
                    .map_err(|e| data_err(&e))?
            }
        };

        if !first_sighting {
            // Conflict, not an error: counted, acked, never forwarded
            metrics::counter!("normalizer_duplicates_total").increment(1);
            debug!(
                alert_id = %meta.alert_id,
                fingerprint = %fp,
                "duplicate within dedup window"
            );
            self.db
                .alerts()
                .update_status(
                    envelope.alert.id,
                    AlertStatus::Duplicate,
                    "normalizer",
                    Some("fingerprint duplicate within dedup window"),
                )
                .await
                .map_err(|e| data_err(&e))?;
            return Ok(StageOutcome::Done);
        }

        Ok(StageOutcome::Forward(
            subjects::NORMALIZED,
            Box::new(envelope),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;
    use vigil_core::model::{Alert, AlertType, Severity};

    fn alert() -> Alert {
        Alert {
            id: Uuid::new_v4(),
            alert_id: "A-1".to_string(),
            alert_type: AlertType::Other,
            severity: Severity::Low,
            status: AlertStatus::New,
            description: "shell description".to_string(),
            source: "splunk".to_string(),
            timestamp: Utc::now(),
            source_ip: None,
            target_ip: None,
            file_hash: None,
            url: None,
            asset_id: None,
            user_id: None,
            process_name: None,
            raw_payload: json!({"result": {"severity": "critical", "src_ip": "203.0.113.4"}}),
            fingerprint: None,
            risk_score: None,
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn vendor_fields_override_shell() {
        let mut a = alert();
        let fields = formats::normalize(&a.source, &a.raw_payload).unwrap();
        apply_vendor_fields(&mut a, fields);
        assert_eq!(a.severity, Severity::Critical);
        assert_eq!(a.source_ip, Some("203.0.113.4".parse().unwrap()));
        // Untouched fields survive
        assert_eq!(a.description, "shell description");
    }
}
