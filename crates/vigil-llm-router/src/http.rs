//! HTTP surface
//!
//! `/api/v1/*` with the `{success, data, meta}` envelope, plus `/health` and
//! `/metrics`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use vigil_core::{ApiError, ApiErrorCode, ApiResponse};

use crate::registry::{ModelHealth, ModelRegistry, ModelSpec, ModelTier};
use crate::{route, Complexity, RouteRequest, RouteResponse, RouterError, TaskKind};

pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub client: reqwest::Client,
    pub prometheus: PrometheusHandle,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// API key for a tier, from the deployment environment
    fn api_key(tier: ModelTier) -> Option<SecretString> {
        let var = match tier {
            ModelTier::HighReasoning => "VIGIL_LLM_HIGH_API_KEY",
            ModelTier::Balanced => "VIGIL_LLM_BALANCED_API_KEY",
            ModelTier::Fast => "VIGIL_LLM_FAST_API_KEY",
        };
        std::env::var(var).ok().filter(|v| !v.is_empty()).map(SecretString::from)
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/route", post(route_handler))
        .route("/api/v1/complete", post(complete_handler))
        .route("/api/v1/models", get(models_handler))
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

async fn route_handler(
    State(state): State<SharedState>,
    Json(request): Json<RouteRequest>,
) -> Response {
    metrics::counter!("llm_router_route_requests_total").increment(1);
    match route(&state.registry, &request) {
        Ok(response) => Json(ApiResponse::ok(response)).into_response(),
        Err(RouterError::NoModelAvailable) => {
            metrics::counter!("llm_router_no_model_total").increment(1);
            api_err(ApiError::new(
                ApiErrorCode::NoModelAvailable,
                "all model tiers unhealthy",
            ))
        }
        Err(e) => api_err(ApiError::internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub task: TaskKind,
    pub complexity: Complexity,
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub model_id: String,
    pub content: String,
}

/// Proxy path: route, then run the chat completion against the chosen
/// provider (OpenAI-compatible wire shape).
async fn complete_handler(
    State(state): State<SharedState>,
    Json(request): Json<CompleteRequest>,
) -> Response {
    let routed = match route(
        &state.registry,
        &RouteRequest {
            task: request.task,
            complexity: request.complexity,
        },
    ) {
        Ok(routed) => routed,
        Err(RouterError::NoModelAvailable) => {
            return api_err(ApiError::new(
                ApiErrorCode::NoModelAvailable,
                "all model tiers unhealthy",
            ))
        }
        Err(e) => return api_err(ApiError::internal(e.to_string())),
    };

    match proxy_completion(&state, &routed, &request).await {
        Ok(content) => Json(ApiResponse::ok(CompleteResponse {
            model_id: routed.model_id,
            content,
        }))
        .into_response(),
        Err(e) => {
            warn!(model = %routed.model_id, error = %e, "completion proxy failed");
            state.registry.record_probe(&routed.model_id, false);
            api_err(ApiError::internal("completion call failed"))
        }
    }
}

async fn proxy_completion(
    state: &AppState,
    routed: &RouteResponse,
    request: &CompleteRequest,
) -> Result<String, RouterError> {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    messages.push(serde_json::json!({"role": "user", "content": request.prompt}));

    let body = serde_json::json!({
        "model": routed.model_id,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(routed.model_params.max_tokens),
        "temperature": routed.model_params.temperature,
    });

    let url = format!(
        "{}/chat/completions",
        routed.endpoint.trim_end_matches('/')
    );
    let mut builder = state.client.post(&url).json(&body);
    if let Some(key) = AppState::api_key(routed.tier) {
        builder = builder.bearer_auth(key.expose_secret());
    }

    let response = builder
        .send()
        .await
        .map_err(|e| RouterError::Completion(e.to_string()))?;
    if !response.status().is_success() {
        return Err(RouterError::Completion(format!(
            "provider returned {}",
            response.status()
        )));
    }
    let parsed: serde_json::Value = response
        .json()
        .await
        .map_err(|e| RouterError::Completion(e.to_string()))?;
    parsed["choices"][0]["message"]["content"]
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| RouterError::Completion("missing content in provider response".to_string()))
}

#[derive(Debug, Serialize)]
struct ModelView {
    #[serde(flatten)]
    spec: ModelSpec,
    health: ModelHealth,
}

async fn models_handler(State(state): State<SharedState>) -> Response {
    let models: Vec<ModelView> = state
        .registry
        .models()
        .iter()
        .map(|spec| ModelView {
            spec: spec.clone(),
            health: state.registry.health(&spec.model_id),
        })
        .collect();
    Json(ApiResponse::ok(models)).into_response()
}

async fn health_handler(State(state): State<SharedState>) -> Response {
    let healthy = state.registry.any_healthy();
    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "checks": {
            "models": if healthy { "ok" } else { "all_unhealthy" },
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
