//! LLM access for the triage agent
//!
//! Routing comes from the router service; a directly-configured provider
//! covers router outages. Completions speak the OpenAI-compatible chat
//! shape the shipped model tiers expose.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};

use vigil_core::backoff::RetryPolicy;
use vigil_core::config::LlmFallbackConfig;
use vigil_core::model::{AlertType, Severity};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(String),
    #[error("llm returned status {status}")]
    Api { status: u16 },
    #[error("llm rate limited")]
    RateLimited,
    #[error("llm contract violation: {0}")]
    Contract(String),
    #[error("llm call timed out")]
    Timeout,
    #[error("no model available")]
    NoModel,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::RateLimited
                | Self::Timeout
                | Self::Api { status: 500..=599 }
        )
    }
}

/// Complexity bands the router understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Complexity derivation from alert signals:
/// hot threat score, critical asset, or critical/high severity push high;
/// low/info severity stays low; the middle is medium.
pub fn derive_complexity(
    severity: Severity,
    threat_score: Option<f64>,
    asset_criticality: Option<&str>,
) -> Complexity {
    if threat_score.unwrap_or(0.0) >= 70.0
        || asset_criticality == Some("critical")
        || matches!(severity, Severity::Critical | Severity::High)
    {
        Complexity::High
    } else if matches!(severity, Severity::Low | Severity::Info) {
        Complexity::Low
    } else {
        Complexity::Medium
    }
}

/// A resolved model target
#[derive(Debug, Clone)]
pub struct ChosenModel {
    pub model_id: String,
    pub endpoint: String,
    pub api_key: Option<SecretString>,
}

/// Client for the router service with the configured direct fallback
pub struct RouterClient {
    client: reqwest::Client,
    base_url: String,
    fallback: LlmFallbackConfig,
}

impl RouterClient {
    pub fn new(base_url: impl Into<String>, fallback: LlmFallbackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            fallback,
        }
    }

    fn fallback_model(&self) -> ChosenModel {
        ChosenModel {
            model_id: self.fallback.model.clone(),
            endpoint: self.fallback.endpoint.clone(),
            api_key: self.fallback.api_key.clone(),
        }
    }

    fn tier_api_key(tier: &str) -> Option<SecretString> {
        let var = match tier {
            "high_reasoning" => "VIGIL_LLM_HIGH_API_KEY",
            "balanced" => "VIGIL_LLM_BALANCED_API_KEY",
            "fast" => "VIGIL_LLM_FAST_API_KEY",
            _ => return None,
        };
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
    }

    /// Ask the router for a model. Router unreachable -> direct fallback;
    /// router answering "no model available" -> deterministic-only triage.
    pub async fn choose(&self, complexity: Complexity) -> Result<ChosenModel, LlmError> {
        let url = format!("{}/api/v1/route", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "task": "triage",
            "complexity": complexity.as_str(),
        });

        let response = match self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "llm router unreachable, using configured fallback");
                metrics::counter!("triage_router_fallbacks_total").increment(1);
                return Ok(self.fallback_model());
            }
        };

        if response.status().as_u16() == 503 {
            return Err(LlmError::NoModel);
        }
        if !response.status().is_success() {
            warn!(status = %response.status(), "llm router error, using configured fallback");
            return Ok(self.fallback_model());
        }

        let parsed: serde_json::Value = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "llm router response unreadable, using configured fallback");
                return Ok(self.fallback_model());
            }
        };
        let data = &parsed["data"];
        let (Some(model_id), Some(endpoint)) =
            (data["model_id"].as_str(), data["endpoint"].as_str())
        else {
            warn!("llm router response missing fields, using configured fallback");
            return Ok(self.fallback_model());
        };

        Ok(ChosenModel {
            model_id: model_id.to_string(),
            endpoint: endpoint.to_string(),
            api_key: data["tier"]
                .as_str()
                .and_then(Self::tier_api_key)
                .or_else(|| self.fallback.api_key.clone()),
        })
    }
}

/// Completion client with timeout and transient-error retries
pub struct LlmClient {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn complete(&self, model: &ChosenModel, prompt: &str) -> Result<String, LlmError> {
        self.retry
            .run(
                || self.complete_once(model, prompt),
                LlmError::is_retryable,
            )
            .await
    }

    async fn complete_once(&self, model: &ChosenModel, prompt: &str) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            model.endpoint.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": model.model_id,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });

        let mut builder = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = &model.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        match response.status().as_u16() {
            429 => return Err(LlmError::RateLimited),
            s if !(200..300).contains(&s) => return Err(LlmError::Api { status: s }),
            _ => {}
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Contract(e.to_string()))?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Contract("missing message content".to_string()))?;

        debug!(model = %model.model_id, chars = content.len(), "llm completion received");
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn complexity_derivation_matrix() {
        assert_eq!(
            derive_complexity(Severity::High, None, None),
            Complexity::High
        );
        assert_eq!(
            derive_complexity(Severity::Medium, Some(70.0), None),
            Complexity::High
        );
        assert_eq!(
            derive_complexity(Severity::Medium, Some(10.0), Some("critical")),
            Complexity::High
        );
        assert_eq!(
            derive_complexity(Severity::Medium, Some(10.0), Some("medium")),
            Complexity::Medium
        );
        assert_eq!(derive_complexity(Severity::Low, None, None), Complexity::Low);
        assert_eq!(derive_complexity(Severity::Info, None, None), Complexity::Low);
    }

    fn fallback() -> LlmFallbackConfig {
        LlmFallbackConfig {
            endpoint: "http://fallback.local/v1".to_string(),
            model: "qwen-plus".to_string(),
            api_key: None,
        }
    }

    #[tokio::test]
    async fn router_unreachable_uses_fallback() {
        let router = RouterClient::new("http://127.0.0.1:9", fallback());
        let chosen = router.choose(Complexity::High).await.unwrap();
        assert_eq!(chosen.model_id, "qwen-plus");
        assert_eq!(chosen.endpoint, "http://fallback.local/v1");
    }

    #[tokio::test]
    async fn router_503_means_no_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/route"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let router = RouterClient::new(server.uri(), fallback());
        assert!(matches!(
            router.choose(Complexity::High).await,
            Err(LlmError::NoModel)
        ));
    }

    #[tokio::test]
    async fn router_response_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/route"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": {
                    "model_id": "deepseek-reasoner",
                    "endpoint": "http://models.local/v1",
                    "tier": "high_reasoning"
                }
            })))
            .mount(&server)
            .await;

        let router = RouterClient::new(server.uri(), fallback());
        let chosen = router.choose(Complexity::High).await.unwrap();
        assert_eq!(chosen.model_id, "deepseek-reasoner");
        assert_eq!(chosen.endpoint, "http://models.local/v1");
    }

    #[tokio::test]
    async fn completion_parses_openai_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"risk_level\":\"high\"}"}}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(Duration::from_secs(5));
        let model = ChosenModel {
            model_id: "qwen-plus".to_string(),
            endpoint: server.uri(),
            api_key: None,
        };
        let content = client.complete(&model, "analyze").await.unwrap();
        assert!(content.contains("risk_level"));
    }

    #[tokio::test]
    async fn completion_4xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(Duration::from_secs(5));
        let model = ChosenModel {
            model_id: "m".to_string(),
            endpoint: server.uri(),
            api_key: None,
        };
        assert!(matches!(
            client.complete(&model, "x").await,
            Err(LlmError::Api { status: 400 })
        ));
    }
}
