//! HTTP intake surface
//!
//! `{success, data, meta}` envelopes, stable error codes, token-bucket rate
//! limiting per source IP. Budget is consumed before validation, so a
//! client burning its budget on garbage still pays for it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use vigil_core::limiter::TokenBucketLimiter;
use vigil_core::{ApiError, ApiErrorCode, ApiResponse};

use crate::intake::{FieldError, IngestAlert, IngestBatch};
use crate::service::{IngestError, IngestService};

pub struct AppState {
    pub service: Arc<IngestService>,
    pub limiter: TokenBucketLimiter,
    pub prometheus: PrometheusHandle,
    pub max_batch: usize,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/alerts", post(ingest_handler))
        .route("/api/v1/alerts/batch", post(batch_handler))
        .route("/api/v1/alerts/:alert_id", get(lookup_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn api_err(error: ApiError) -> Response {
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiResponse::<()>::err(error))).into_response()
}

/// Proxy-aware client key for the rate limiter
fn client_key(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn validation_details(errors: &[FieldError]) -> serde_json::Value {
    json!({ "errors": errors })
}

fn ingest_failure(e: &IngestError) -> Response {
    error!(error = %e, "ingest failed");
    metrics::counter!("ingestor_errors_total").increment(1);
    api_err(ApiError::internal("failed to accept alert"))
}

async fn ingest_handler(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<IngestAlert>,
) -> Response {
    let key = client_key(&headers, addr);
    if !state.limiter.try_acquire(&key) {
        metrics::counter!("ingestor_rate_limited_total").increment(1);
        return api_err(ApiError::new(
            ApiErrorCode::RateLimitExceeded,
            "per-client request budget exhausted",
        ));
    }

    let alert = match body.validate(Utc::now()) {
        Ok(alert) => alert,
        Err(errors) => {
            metrics::counter!("ingestor_validation_failures_total").increment(1);
            return api_err(
                ApiError::validation("alert failed schema validation")
                    .with_details(validation_details(&errors)),
            );
        }
    };

    match state.service.ingest(alert).await {
        Ok(receipt) => Json(ApiResponse::ok(receipt)).into_response(),
        Err(e) => ingest_failure(&e),
    }
}

async fn batch_handler(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(batch): Json<IngestBatch>,
) -> Response {
    let key = client_key(&headers, addr);
    if !state.limiter.try_acquire(&key) {
        metrics::counter!("ingestor_rate_limited_total").increment(1);
        return api_err(ApiError::new(
            ApiErrorCode::RateLimitExceeded,
            "per-client request budget exhausted",
        ));
    }

    if batch.alerts.len() > state.max_batch {
        return api_err(
            ApiError::new(
                ApiErrorCode::PayloadTooLarge,
                format!("batch exceeds {} items", state.max_batch),
            )
            .with_details(json!({"submitted": batch.alerts.len()})),
        );
    }

    let batch_id = batch
        .batch_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let total = batch.alerts.len();
    let mut ingestion_ids = Vec::new();
    let mut errors = Vec::new();

    for (index, item) in batch.alerts.into_iter().enumerate() {
        match item.validate(Utc::now()) {
            Ok(alert) => match state.service.ingest(alert).await {
                Ok(receipt) => ingestion_ids.push(receipt.ingestion_id),
                Err(e) => {
                    error!(index, error = %e, "batch item ingest failed");
                    errors.push(json!({
                        "index": index,
                        "code": ApiErrorCode::InternalError,
                        "message": "failed to accept alert",
                    }));
                }
            },
            Err(field_errors) => {
                metrics::counter!("ingestor_validation_failures_total").increment(1);
                errors.push(json!({
                    "index": index,
                    "code": ApiErrorCode::ValidationError,
                    "message": "alert failed schema validation",
                    "details": validation_details(&field_errors),
                }));
            }
        }
    }

    let failed = errors.len();
    Json(ApiResponse::ok(json!({
        "batch_id": batch_id,
        "total": total,
        "successful": total - failed,
        "failed": failed,
        "ingestion_ids": ingestion_ids,
        "errors": errors,
    })))
    .into_response()
}

async fn lookup_handler(
    State(state): State<SharedState>,
    Path(alert_id): Path<String>,
) -> Response {
    match state.service.db().alerts().get_by_external_id(&alert_id).await {
        Ok(Some(alert)) => Json(ApiResponse::ok(alert)).into_response(),
        Ok(None) => api_err(ApiError::not_found(format!("no alert {alert_id}"))),
        Err(e) => {
            error!(error = %e, "alert lookup failed");
            api_err(ApiError::internal("lookup failed"))
        }
    }
}

async fn health_handler(State(state): State<SharedState>) -> Response {
    let db_ok = state.service.db().ping().await;
    let broker_ok = matches!(
        state.service.bus().connection_state(),
        async_nats::connection::State::Connected
    );

    let healthy = db_ok && broker_ok;
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "checks": {
            "database": if db_ok { "ok" } else { "unreachable" },
            "message_queue": if broker_ok { "ok" } else { "unreachable" },
        },
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn metrics_handler(State(state): State<SharedState>) -> String {
    state.prometheus.render()
}
