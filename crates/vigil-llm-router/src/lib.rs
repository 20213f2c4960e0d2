//! LLM routing service
//!
//! Given a task descriptor, picks a model tier, skips unhealthy models, and
//! returns routing info. Optionally proxies the completion call.

pub mod http;
pub mod probe;
pub mod registry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use registry::{ModelRegistry, ModelTier};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no model available: all tiers unhealthy")]
    NoModelAvailable,
    #[error("completion call failed: {0}")]
    Completion(String),
}

/// Task kind carried in a route request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Triage,
    Classification,
    Summarization,
    General,
}

/// Complexity derived by the caller from alert signals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub task: TaskKind,
    pub complexity: Complexity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub model_id: String,
    pub endpoint: String,
    pub tier: ModelTier,
    pub model_params: ModelParams,
}

/// Tier selection policy:
/// - triage at high complexity gets the high-reasoning tier
/// - classification, or anything at low complexity, gets the fast tier
/// - everything else gets the balanced tier
pub fn select_tier(task: TaskKind, complexity: Complexity) -> ModelTier {
    if task == TaskKind::Triage && complexity == Complexity::High {
        ModelTier::HighReasoning
    } else if task == TaskKind::Classification || complexity == Complexity::Low {
        ModelTier::Fast
    } else {
        ModelTier::Balanced
    }
}

/// Resolve a route: desired tier first, then failover tiers, skipping
/// unhealthy models.
pub fn route(registry: &ModelRegistry, request: &RouteRequest) -> Result<RouteResponse, RouterError> {
    let desired = select_tier(request.task, request.complexity);
    for tier in desired.failover_order() {
        if let Some(model) = registry.first_healthy(tier) {
            return Ok(RouteResponse {
                model_id: model.model_id.clone(),
                endpoint: model.provider_endpoint.clone(),
                tier,
                model_params: ModelParams {
                    max_tokens: 2048,
                    temperature: 0.2,
                },
            });
        }
    }
    Err(RouterError::NoModelAvailable)
}
