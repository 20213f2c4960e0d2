//! Vigil broker library
//!
//! JetStream-backed messaging for the alert pipeline. Subjects play routing
//! keys, durable pull consumers play queues, and every primary subject has a
//! paired dead-letter subject under `dlq.`.
//!
//! ## Subjects
//! ```text
//! alerts.raw             - S1 -> S2
//! alerts.normalized      - S2 -> S3
//! alerts.enriched        - S3 -> S4
//! alerts.contextualized  - S4 -> S5
//! alerts.result          - S5 -> downstream
//! dlq.alerts.*           - exhausted or permanently-failed messages
//! ```

pub mod replay;
pub mod shutdown;
pub mod worker;

use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use vigil_core::AlertEnvelope;

pub use worker::{StageError, StageErrorKind, StageHandler, StageOutcome, StageWorker};

/// Pipeline subjects
pub mod subjects {
    pub const RAW: &str = "alerts.raw";
    pub const NORMALIZED: &str = "alerts.normalized";
    pub const ENRICHED: &str = "alerts.enriched";
    pub const CONTEXTUALIZED: &str = "alerts.contextualized";
    pub const RESULT: &str = "alerts.result";

    pub const ALL: [&str; 5] = [RAW, NORMALIZED, ENRICHED, CONTEXTUALIZED, RESULT];

    /// Dead-letter subject paired with a primary subject
    pub fn dlq(subject: &str) -> String {
        format!("dlq.{subject}")
    }

    /// Primary subject for a dead-letter subject, if it is one
    pub fn primary(dlq_subject: &str) -> Option<&str> {
        dlq_subject.strip_prefix("dlq.")
    }
}

/// Stream names for JetStream
pub mod streams {
    pub const ALERTS: &str = "VIGIL_ALERTS";
    pub const ALERTS_DLQ: &str = "VIGIL_ALERTS_DLQ";
}

/// Message header names, propagated end to end
pub mod headers {
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const ALERT_ID: &str = "alert-id";
    pub const STAGE_TS: &str = "stage-ts";
    pub const ATTEMPT_COUNT: &str = "attempt-count";
    pub const PRIORITY: &str = "priority";

    pub const DLQ_REASON: &str = "dlq-reason";
    pub const DLQ_COUNT: &str = "dlq-count";
    pub const DLQ_FIRST_FAILED_TS: &str = "dlq-first-failed-ts";
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker connect failed: {0}")]
    Connect(String),
    #[error("stream setup failed: {0}")]
    Stream(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("message serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BusError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serialize(_))
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Per-message metadata carried in headers
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub correlation_id: String,
    pub alert_id: String,
    pub stage_ts: DateTime<Utc>,
    pub attempt_count: u32,
    /// Severity-derived, 1-10; advisory for downstream consumers
    pub priority: u8,
}

impl MessageMeta {
    /// Fresh metadata at pipeline entry
    pub fn new(alert_id: impl Into<String>, priority: u8) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            stage_ts: Utc::now(),
            attempt_count: 0,
            priority,
        }
    }

    /// Metadata for the next hop: correlation id and priority carry over,
    /// stage timestamp is reset, attempts start fresh.
    pub fn next_stage(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            alert_id: self.alert_id.clone(),
            stage_ts: Utc::now(),
            attempt_count: 0,
            priority: self.priority,
        }
    }

    pub fn to_headers(&self) -> async_nats::HeaderMap {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(headers::CORRELATION_ID, self.correlation_id.as_str());
        headers.insert(headers::ALERT_ID, self.alert_id.as_str());
        headers.insert(headers::STAGE_TS, self.stage_ts.to_rfc3339().as_str());
        headers.insert(
            headers::ATTEMPT_COUNT,
            self.attempt_count.to_string().as_str(),
        );
        headers.insert(headers::PRIORITY, self.priority.to_string().as_str());
        headers
    }

    /// Parse from headers; tolerates missing values so a foreign message
    /// still flows (with neutral metadata) instead of dead-lettering.
    pub fn from_headers(headers: Option<&async_nats::HeaderMap>) -> Self {
        let get = |name: &str| {
            headers
                .and_then(|h| h.get(name))
                .map(|v| v.as_str().to_string())
        };
        Self {
            correlation_id: get(headers::CORRELATION_ID)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            alert_id: get(headers::ALERT_ID).unwrap_or_default(),
            stage_ts: get(headers::STAGE_TS)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map_or_else(Utc::now, |t| t.with_timezone(&Utc)),
            attempt_count: get(headers::ATTEMPT_COUNT)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            priority: get(headers::PRIORITY)
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// NATS server URL (e.g. "nats://localhost:4222")
    pub url: String,
    /// Max messages retained per stream
    pub max_messages: i64,
    /// Message TTL on the primary stream
    pub max_age: Duration,
    /// Deliveries before a message is considered exhausted (initial + retries)
    pub max_deliver: i64,
    /// How long the broker waits for an ack before redelivery
    pub ack_wait: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            max_messages: 100_000,
            max_age: Duration::from_secs(24 * 3600),
            max_deliver: 4,
            ack_wait: Duration::from_secs(90),
        }
    }
}

impl BusConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Handle to the alert bus
#[derive(Clone)]
pub struct Bus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: BusConfig,
}

impl Bus {
    /// Connect and ensure streams exist
    pub async fn connect(config: BusConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());

        let bus = Self {
            client,
            jetstream,
            config,
        };
        bus.init_streams().await?;
        Ok(bus)
    }

    async fn init_streams(&self) -> Result<()> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: streams::ALERTS.to_string(),
                subjects: subjects::ALL.iter().map(ToString::to_string).collect(),
                max_messages: self.config.max_messages,
                max_age: self.config.max_age,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;

        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: streams::ALERTS_DLQ.to_string(),
                subjects: vec!["dlq.alerts.>".to_string()],
                max_messages: self.config.max_messages,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;

        tracing::info!("JetStream streams initialized");
        Ok(())
    }

    /// Publish an envelope with persistent delivery, waiting for the stream ack
    pub async fn publish(
        &self,
        subject: &str,
        meta: &MessageMeta,
        envelope: &AlertEnvelope,
    ) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        self.publish_raw(subject, meta.to_headers(), payload.into())
            .await
    }

    /// Publish pre-serialized bytes with explicit headers
    pub async fn publish_raw(
        &self,
        subject: &str,
        headers: async_nats::HeaderMap,
        payload: Bytes,
    ) -> Result<()> {
        self.jetstream
            .publish_with_headers(subject.to_string(), headers, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    /// Route a failed message to the paired dead-letter subject.
    ///
    /// The original body is preserved; failure metadata rides in headers so
    /// the alert id and reason are always recoverable.
    pub async fn publish_dlq(
        &self,
        origin_subject: &str,
        meta: &MessageMeta,
        payload: Bytes,
        reason: &str,
        delivery_count: u32,
    ) -> Result<()> {
        let mut headers = meta.to_headers();
        headers.insert(headers::DLQ_REASON, reason);
        headers.insert(headers::DLQ_COUNT, delivery_count.to_string().as_str());
        headers.insert(
            headers::DLQ_FIRST_FAILED_TS,
            Utc::now().to_rfc3339().as_str(),
        );
        self.publish_raw(&subjects::dlq(origin_subject), headers, payload)
            .await
    }

    /// Durable pull consumer for one stage on one subject
    pub async fn consumer(
        &self,
        stage: &str,
        subject: &str,
    ) -> Result<jetstream::consumer::Consumer<pull::Config>> {
        let stream = self
            .jetstream
            .get_stream(streams::ALERTS)
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;

        let durable = format!("vigil-{stage}");
        stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: subject.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    max_deliver: self.config.max_deliver,
                    ack_wait: self.config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Consume(e.to_string()))
    }

    /// Ephemeral pull consumer over a dead-letter subject, used by replay
    pub async fn dlq_consumer(
        &self,
        subject: &str,
    ) -> Result<jetstream::consumer::Consumer<pull::Config>> {
        let stream = self
            .jetstream
            .get_stream(streams::ALERTS_DLQ)
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;
        stream
            .create_consumer(pull::Config {
                filter_subject: subjects::dlq(subject),
                ack_policy: jetstream::consumer::AckPolicy::Explicit,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Consume(e.to_string()))
    }

    /// Broker liveness for health checks
    pub fn connection_state(&self) -> async_nats::connection::State {
        self.client.connection_state()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_subject_pairing() {
        assert_eq!(subjects::dlq(subjects::RAW), "dlq.alerts.raw");
        assert_eq!(subjects::primary("dlq.alerts.raw"), Some(subjects::RAW));
        assert_eq!(subjects::primary("alerts.raw"), None);
    }

    #[test]
    fn meta_header_round_trip() {
        let meta = MessageMeta {
            correlation_id: "corr-1".to_string(),
            alert_id: "ALT-9".to_string(),
            stage_ts: Utc::now(),
            attempt_count: 2,
            priority: 8,
        };
        let headers = meta.to_headers();
        let back = MessageMeta::from_headers(Some(&headers));
        assert_eq!(back.correlation_id, "corr-1");
        assert_eq!(back.alert_id, "ALT-9");
        assert_eq!(back.attempt_count, 2);
        assert_eq!(back.priority, 8);
    }

    #[test]
    fn meta_defaults_for_foreign_messages() {
        let meta = MessageMeta::from_headers(None);
        assert!(!meta.correlation_id.is_empty());
        assert_eq!(meta.attempt_count, 0);
        assert_eq!(meta.priority, 1);
    }

    #[test]
    fn next_stage_preserves_correlation() {
        let meta = MessageMeta::new("ALT-1", 10);
        let next = meta.next_stage();
        assert_eq!(next.correlation_id, meta.correlation_id);
        assert_eq!(next.priority, 10);
        assert_eq!(next.attempt_count, 0);
    }
}
