//! Dead-letter replay
//!
//! Maintenance path: after an operator fixes the underlying fault, messages
//! parked on a dead-letter subject are moved back to their primary subject
//! with a fresh attempt count.

use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use crate::{headers, subjects, Bus, MessageMeta, Result};

/// Outcome of one replay pass
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayReport {
    pub replayed: usize,
    pub failed: usize,
}

/// Move up to `limit` messages from `dlq.<subject>` back onto `<subject>`.
///
/// Bodies are republished unchanged; the dead-letter headers are dropped and
/// the attempt count resets so the full retry budget applies again.
pub async fn replay_dlq(bus: &Bus, subject: &str, limit: usize) -> Result<ReplayReport> {
    let consumer = bus.dlq_consumer(subject).await?;
    let mut messages = consumer
        .fetch()
        .max_messages(limit)
        .expires(Duration::from_secs(2))
        .messages()
        .await
        .map_err(|e| crate::BusError::Consume(e.to_string()))?;

    let mut report = ReplayReport::default();
    while let Some(next) = messages.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                warn!(subject, error = %e, "replay receive error");
                report.failed += 1;
                continue;
            }
        };

        let mut meta = MessageMeta::from_headers(message.headers.as_ref());
        meta.attempt_count = 0;
        let reason = message
            .headers
            .as_ref()
            .and_then(|h| h.get(headers::DLQ_REASON))
            .map(|v| v.as_str().to_string())
            .unwrap_or_default();

        match bus
            .publish_raw(subject, meta.to_headers(), message.payload.clone())
            .await
        {
            Ok(()) => {
                if let Err(e) = message.ack().await {
                    warn!(subject, error = %e, "replay ack failed");
                }
                info!(
                    subject,
                    alert_id = %meta.alert_id,
                    original_reason = %reason,
                    "replayed dead-lettered message"
                );
                report.replayed += 1;
            }
            Err(e) => {
                warn!(subject, alert_id = %meta.alert_id, error = %e, "replay publish failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Replay every pipeline subject's DLQ, primarily for operational tooling
pub async fn replay_all(bus: &Bus, limit_per_subject: usize) -> Result<ReplayReport> {
    let mut total = ReplayReport::default();
    for subject in subjects::ALL {
        let report = replay_dlq(bus, subject, limit_per_subject).await?;
        total.replayed += report.replayed;
        total.failed += report.failed;
    }
    Ok(total)
}
