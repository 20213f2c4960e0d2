//! HTTP surface for search, index, and stats

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use uuid::Uuid;

use vigil_core::{ApiError, ApiResponse};

use crate::{IndexRequest, SearchRequest, SimilarityError, SimilarityService};

pub struct AppState {
    pub service: Arc<SimilarityService>,
    pub prometheus: PrometheusHandle,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/search", post(search_handler))
        .route("/api/v1/index", post(index_handler))
        .route("/api/v1/index/:id", delete(delete_handler))
        .route("/api/v1/stats", get(stats_handler))
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

fn service_err(e: &SimilarityError) -> Response {
    warn!(error = %e, "similarity operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::err(ApiError::internal(
            "similarity backend failure",
        ))),
    )
        .into_response()
}

async fn search_handler(
    State(state): State<SharedState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    match state.service.search(&request).await {
        Ok(hits) => Json(ApiResponse::ok_with_meta(
            hits,
            serde_json::json!({"min_similarity": request.min_similarity}),
        ))
        .into_response(),
        Err(e) => service_err(&e),
    }
}

async fn index_handler(
    State(state): State<SharedState>,
    Json(request): Json<IndexRequest>,
) -> Response {
    match state.service.index(&request).await {
        Ok(()) => Json(ApiResponse::ok(
            serde_json::json!({"alert_uuid": request.alert_uuid, "indexed": true}),
        ))
        .into_response(),
        Err(e) => service_err(&e),
    }
}

async fn delete_handler(State(state): State<SharedState>, Path(id): Path<Uuid>) -> Response {
    match state.service.delete(id).await {
        Ok(removed) => {
            Json(ApiResponse::ok(serde_json::json!({"removed": removed}))).into_response()
        }
        Err(e) => service_err(&e),
    }
}

async fn stats_handler(State(state): State<SharedState>) -> Response {
    match state.service.stats().await {
        Ok(stats) => Json(ApiResponse::ok(stats)).into_response(),
        Err(e) => service_err(&e),
    }
}

async fn health_handler(State(state): State<SharedState>) -> Response {
    let index_ok = state.service.stats().await.is_ok();
    let body = serde_json::json!({
        "status": if index_ok { "ok" } else { "degraded" },
        "checks": { "vector_index": if index_ok { "ok" } else { "unreachable" } },
    });
    let status = if index_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn metrics_handler(State(state): State<SharedState>) -> String {
    state.prometheus.render()
}
