//! Static model registry with health tracking

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Capability tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    HighReasoning,
    Balanced,
    Fast,
}

impl ModelTier {
    /// Failover order starting from this tier. Downgrades run toward the
    /// cheap end; the fast tier upgrades through balanced before burning
    /// high-reasoning budget.
    pub fn failover_order(self) -> [ModelTier; 3] {
        match self {
            Self::HighReasoning => [Self::HighReasoning, Self::Balanced, Self::Fast],
            Self::Balanced => [Self::Balanced, Self::Fast, Self::HighReasoning],
            Self::Fast => [Self::Fast, Self::Balanced, Self::HighReasoning],
        }
    }
}

/// One registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    pub tier: ModelTier,
    pub max_context: u32,
    pub cost_per_1k: f64,
    /// 1-10
    pub speed_score: u8,
    /// 1-10
    pub reasoning_score: u8,
    pub suitable_tasks: Vec<String>,
    pub provider_endpoint: String,
}

/// Probe state per model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_probe: Option<DateTime<Utc>>,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_probe: None,
        }
    }
}

/// Failures before a model is marked unhealthy
const UNHEALTHY_AFTER: u32 = 3;

pub struct ModelRegistry {
    models: Vec<ModelSpec>,
    health: DashMap<String, ModelHealth>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        let health = DashMap::new();
        for model in &models {
            health.insert(model.model_id.clone(), ModelHealth::default());
        }
        Self { models, health }
    }

    /// The three shipped tiers. Endpoints are overridable per deployment via
    /// the standard OpenAI-compatible base URL layout.
    pub fn with_defaults() -> Self {
        let endpoint = |var: &str, default: &str| {
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        };
        Self::new(vec![
            ModelSpec {
                model_id: "deepseek-reasoner".to_string(),
                tier: ModelTier::HighReasoning,
                max_context: 65_536,
                cost_per_1k: 0.0022,
                speed_score: 3,
                reasoning_score: 9,
                suitable_tasks: vec!["triage".to_string(), "analysis".to_string()],
                provider_endpoint: endpoint(
                    "VIGIL_LLM_HIGH_ENDPOINT",
                    "https://api.deepseek.com/v1",
                ),
            },
            ModelSpec {
                model_id: "qwen-plus".to_string(),
                tier: ModelTier::Balanced,
                max_context: 131_072,
                cost_per_1k: 0.0008,
                speed_score: 6,
                reasoning_score: 7,
                suitable_tasks: vec![
                    "triage".to_string(),
                    "summarization".to_string(),
                    "general".to_string(),
                ],
                provider_endpoint: endpoint(
                    "VIGIL_LLM_BALANCED_ENDPOINT",
                    "https://dashscope.aliyuncs.com/compatible-mode/v1",
                ),
            },
            ModelSpec {
                model_id: "qwen-turbo".to_string(),
                tier: ModelTier::Fast,
                max_context: 131_072,
                cost_per_1k: 0.0002,
                speed_score: 9,
                reasoning_score: 5,
                suitable_tasks: vec!["classification".to_string(), "extraction".to_string()],
                provider_endpoint: endpoint(
                    "VIGIL_LLM_FAST_ENDPOINT",
                    "https://dashscope.aliyuncs.com/compatible-mode/v1",
                ),
            },
        ])
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn health(&self, model_id: &str) -> ModelHealth {
        self.health
            .get(model_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// First healthy model in a tier, registry order
    pub fn first_healthy(&self, tier: ModelTier) -> Option<&ModelSpec> {
        self.models
            .iter()
            .find(|m| m.tier == tier && self.health(&m.model_id).healthy)
    }

    /// Record one probe outcome. Three consecutive failures mark the model
    /// unhealthy; any success restores it.
    pub fn record_probe(&self, model_id: &str, success: bool) {
        let mut entry = self
            .health
            .entry(model_id.to_string())
            .or_default();
        entry.last_probe = Some(Utc::now());
        if success {
            entry.consecutive_failures = 0;
            entry.healthy = true;
        } else {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= UNHEALTHY_AFTER {
                entry.healthy = false;
            }
        }
    }

    /// Any model healthy anywhere
    pub fn any_healthy(&self) -> bool {
        self.models
            .iter()
            .any(|m| self.health(&m.model_id).healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_failures_mark_unhealthy_and_success_restores() {
        let registry = ModelRegistry::with_defaults();
        let id = "qwen-plus";
        registry.record_probe(id, false);
        registry.record_probe(id, false);
        assert!(registry.health(id).healthy);
        registry.record_probe(id, false);
        assert!(!registry.health(id).healthy);
        registry.record_probe(id, true);
        assert!(registry.health(id).healthy);
        assert_eq!(registry.health(id).consecutive_failures, 0);
    }

    #[test]
    fn tier_failover_order() {
        assert_eq!(
            ModelTier::HighReasoning.failover_order(),
            [
                ModelTier::HighReasoning,
                ModelTier::Balanced,
                ModelTier::Fast
            ]
        );
        assert_eq!(
            ModelTier::Fast.failover_order()[1],
            ModelTier::Balanced
        );
    }
}
