//! Stage worker loop
//!
//! One worker per stage process: fetches batches from a durable pull
//! consumer, processes up to `prefetch` messages concurrently, and settles
//! each message exactly one way:
//! - success or ignored duplicate -> ack
//! - transient failure with retries left -> nak with backoff delay
//! - exhausted, permanent, or deadline-expired -> publish to DLQ, then ack

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_nats::jetstream::AckKind;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vigil_core::backoff::RetryPolicy;
use vigil_core::AlertEnvelope;

use crate::{Bus, MessageMeta, Result};

/// How long one fetch request stays open waiting for messages
const FETCH_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    /// Dependency hiccup; retried with backoff up to the retry budget
    Transient,
    /// Never retried; dead-letters immediately
    Permanent,
    /// Stage deadline expired; dead-letters with reason "timeout"
    Timeout,
}

/// Failure surfaced by a stage handler
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct StageError {
    pub reason: String,
    pub kind: StageErrorKind,
    /// Override of the default retry budget (e.g. parse failures get 1)
    pub max_retries: Option<u32>,
    /// Override of the backoff delay for the next retry
    pub retry_delay: Option<Duration>,
}

impl StageError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: StageErrorKind::Transient,
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: StageErrorKind::Permanent,
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            reason: "timeout".to_string(),
            kind: StageErrorKind::Timeout,
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn with_retry_budget(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(delay);
        self
    }
}

/// What a handler wants done with a successfully processed message
#[derive(Debug)]
pub enum StageOutcome {
    /// Publish the (possibly extended) envelope to the next subject, then ack
    Forward(&'static str, Box<AlertEnvelope>),
    /// Ack without forwarding: duplicates and terminal stages
    Done,
}

/// A pipeline stage: consumes one subject, optionally forwards to the next
#[async_trait::async_trait]
pub trait StageHandler: Send + Sync + 'static {
    /// Short stage name; used for the durable consumer and metric names
    fn stage(&self) -> &'static str;

    async fn handle(
        &self,
        envelope: AlertEnvelope,
        meta: &MessageMeta,
    ) -> std::result::Result<StageOutcome, StageError>;
}

struct WorkerCtx<H> {
    bus: Bus,
    handler: H,
    subject: &'static str,
    deadline: Duration,
    retry: RetryPolicy,
}

/// Long-lived worker binding a handler to a subject
pub struct StageWorker<H> {
    ctx: Arc<WorkerCtx<H>>,
    prefetch: usize,
    grace: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<H: StageHandler> StageWorker<H> {
    pub fn new(
        bus: Bus,
        handler: H,
        subject: &'static str,
        deadline: Duration,
        prefetch: usize,
        grace: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerCtx {
                bus,
                handler,
                subject,
                deadline,
                retry: RetryPolicy::default(),
            }),
            prefetch,
            grace,
            shutdown,
        }
    }

    /// Consume until shutdown. Stops fetching on the shutdown signal, drains
    /// in-flight work up to the grace period, then aborts what remains; the
    /// broker redelivers anything left unacked.
    pub async fn run(mut self) -> Result<()> {
        let stage = self.ctx.handler.stage();
        let consumer = self.ctx.bus.consumer(stage, self.ctx.subject).await?;
        info!(stage, subject = self.ctx.subject, "stage worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let fetch = consumer
                .fetch()
                .max_messages(self.prefetch)
                .expires(FETCH_WINDOW)
                .messages();

            let mut messages = tokio::select! {
                _ = self.shutdown.changed() => break,
                fetched = fetch => match fetched {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(stage, error = %e, "fetch failed, backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            let mut tasks: JoinSet<()> = JoinSet::new();
            while let Some(next) = messages.next().await {
                match next {
                    Ok(message) => {
                        let ctx = Arc::clone(&self.ctx);
                        tasks.spawn(async move {
                            process_message(ctx, message).await;
                        });
                    }
                    Err(e) => warn!(stage, error = %e, "message receive error"),
                }
            }

            if *self.shutdown.borrow() {
                let drained =
                    tokio::time::timeout(self.grace, async { while tasks.join_next().await.is_some() {} })
                        .await;
                if drained.is_err() {
                    warn!(stage, "shutdown grace expired, aborting in-flight work");
                    tasks.abort_all();
                }
                break;
            }
            while tasks.join_next().await.is_some() {}
        }

        info!(stage, "stage worker stopped");
        Ok(())
    }
}

async fn process_message<H: StageHandler>(
    ctx: Arc<WorkerCtx<H>>,
    message: async_nats::jetstream::Message,
) {
    let stage = ctx.handler.stage();
    let meta = MessageMeta::from_headers(message.headers.as_ref());
    let delivery = message.info().map_or(1, |i| i.delivered as u32);
    let started = Instant::now();

    let envelope: AlertEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Schema-level garbage never becomes parseable through retries
            warn!(stage, alert_id = %meta.alert_id, error = %e, "malformed envelope");
            dead_letter(&ctx, &message, &meta, "malformed_payload", delivery).await;
            return;
        }
    };

    let handled = tokio::time::timeout(ctx.deadline, ctx.handler.handle(envelope, &meta)).await;

    let result = match handled {
        Ok(result) => result,
        Err(_) => Err(StageError::timeout()),
    };

    match result {
        Ok(StageOutcome::Forward(next_subject, envelope)) => {
            let next_meta = meta.next_stage();
            match ctx.bus.publish(next_subject, &next_meta, &envelope).await {
                Ok(()) => {
                    settle(&message, AckKind::Ack, stage).await;
                    metrics::counter!(format!("{stage}_processed_total")).increment(1);
                    metrics::histogram!(format!("{stage}_duration_seconds"))
                        .record(started.elapsed().as_secs_f64());
                    debug!(
                        stage,
                        alert_id = %meta.alert_id,
                        correlation_id = %meta.correlation_id,
                        next = next_subject,
                        "forwarded"
                    );
                }
                Err(e) => {
                    // Broker publish failure is transient: redeliver and retry
                    metrics::counter!(format!("{stage}_errors_total")).increment(1);
                    warn!(stage, alert_id = %meta.alert_id, error = %e, "publish failed, nacking");
                    retry_or_dlq(
                        &ctx,
                        &message,
                        &meta,
                        &StageError::transient(format!("publish: {e}")),
                        delivery,
                    )
                    .await;
                }
            }
        }
        Ok(StageOutcome::Done) => {
            settle(&message, AckKind::Ack, stage).await;
            metrics::counter!(format!("{stage}_processed_total")).increment(1);
            metrics::histogram!(format!("{stage}_duration_seconds"))
                .record(started.elapsed().as_secs_f64());
        }
        Err(err) => {
            metrics::counter!(format!("{stage}_errors_total")).increment(1);
            match err.kind {
                StageErrorKind::Permanent => {
                    warn!(stage, alert_id = %meta.alert_id, reason = %err.reason, "permanent failure");
                    dead_letter(&ctx, &message, &meta, &err.reason, delivery).await;
                }
                StageErrorKind::Timeout => {
                    warn!(stage, alert_id = %meta.alert_id, "stage deadline expired");
                    dead_letter(&ctx, &message, &meta, "timeout", delivery).await;
                }
                StageErrorKind::Transient => {
                    retry_or_dlq(&ctx, &message, &meta, &err, delivery).await;
                }
            }
        }
    }
}

async fn retry_or_dlq<H: StageHandler>(
    ctx: &Arc<WorkerCtx<H>>,
    message: &async_nats::jetstream::Message,
    meta: &MessageMeta,
    err: &StageError,
    delivery: u32,
) {
    let stage = ctx.handler.stage();
    let budget = err.max_retries.unwrap_or(ctx.retry.max_retries);
    if delivery > budget {
        warn!(
            stage,
            alert_id = %meta.alert_id,
            reason = %err.reason,
            delivery,
            "retries exhausted"
        );
        dead_letter(ctx, message, meta, &err.reason, delivery).await;
    } else {
        let delay = err.retry_delay.unwrap_or_else(|| ctx.retry.delay_for(delivery));
        debug!(
            stage,
            alert_id = %meta.alert_id,
            reason = %err.reason,
            delay_ms = delay.as_millis() as u64,
            "nacking for redelivery"
        );
        settle(message, AckKind::Nak(Some(delay)), stage).await;
    }
}

async fn dead_letter<H: StageHandler>(
    ctx: &Arc<WorkerCtx<H>>,
    message: &async_nats::jetstream::Message,
    meta: &MessageMeta,
    reason: &str,
    delivery: u32,
) {
    let stage = ctx.handler.stage();
    match ctx
        .bus
        .publish_dlq(
            ctx.subject,
            meta,
            message.payload.clone(),
            reason,
            delivery,
        )
        .await
    {
        Ok(()) => {
            metrics::counter!(format!("{stage}_dlq_total")).increment(1);
            settle(message, AckKind::Ack, stage).await;
        }
        Err(e) => {
            // DLQ publish failed; leave the message unacked so the broker
            // redelivers and we get another chance to record the failure.
            error!(stage, alert_id = %meta.alert_id, error = %e, "DLQ publish failed");
            settle(message, AckKind::Nak(Some(Duration::from_secs(5))), stage).await;
        }
    }
}

async fn settle(message: &async_nats::jetstream::Message, kind: AckKind, stage: &str) {
    if let Err(e) = message.ack_with(kind).await {
        warn!(stage, error = %e, "ack failed; broker will redeliver");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_budget_override() {
        let err = StageError::transient("unparseable vendor payload")
            .with_retry_budget(1, Duration::from_secs(5));
        assert_eq!(err.max_retries, Some(1));
        assert_eq!(err.retry_delay, Some(Duration::from_secs(5)));
        assert_eq!(err.kind, StageErrorKind::Transient);
    }

    #[test]
    fn timeout_reason_is_stable() {
        let err = StageError::timeout();
        assert_eq!(err.reason, "timeout");
        assert_eq!(err.kind, StageErrorKind::Timeout);
    }
}
