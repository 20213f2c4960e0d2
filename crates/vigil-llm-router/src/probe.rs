//! Periodic model health probing

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::registry::ModelRegistry;

/// Probe interval per model
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe every model once. OpenAI-compatible providers answer GET /models.
pub async fn probe_all(client: &reqwest::Client, registry: &ModelRegistry) {
    for model in registry.models() {
        let url = format!("{}/models", model.provider_endpoint.trim_end_matches('/'));
        let success = match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success() || response.status().as_u16() == 401,
            Err(e) => {
                debug!(model = %model.model_id, error = %e, "probe request failed");
                false
            }
        };
        registry.record_probe(&model.model_id, success);
        if !success && !registry.health(&model.model_id).healthy {
            warn!(model = %model.model_id, "model marked unhealthy");
        }
    }
}

/// Long-running prober task
pub async fn run_prober(registry: Arc<ModelRegistry>) {
    let client = reqwest::Client::new();
    let mut interval = tokio::time::interval(PROBE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        probe_all(&client, &registry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ModelSpec, ModelTier};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn single_model_registry(endpoint: String) -> ModelRegistry {
        ModelRegistry::new(vec![ModelSpec {
            model_id: "probe-target".to_string(),
            tier: ModelTier::Balanced,
            max_context: 4096,
            cost_per_1k: 0.001,
            speed_score: 5,
            reasoning_score: 5,
            suitable_tasks: vec![],
            provider_endpoint: endpoint,
        }])
    }

    #[tokio::test]
    async fn probe_success_keeps_model_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = single_model_registry(server.uri());
        probe_all(&reqwest::Client::new(), &registry).await;
        assert!(registry.health("probe-target").healthy);
    }

    #[tokio::test]
    async fn auth_rejection_still_counts_as_alive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let registry = single_model_registry(server.uri());
        probe_all(&reqwest::Client::new(), &registry).await;
        assert!(registry.health("probe-target").healthy);
    }

    #[tokio::test]
    async fn repeated_5xx_marks_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = single_model_registry(server.uri());
        let client = reqwest::Client::new();
        for _ in 0..3 {
            probe_all(&client, &registry).await;
        }
        assert!(!registry.health("probe-target").healthy);
    }
}
