//! Context provider capability
//!
//! `lookup(key) -> data` over whatever backs it: a GeoIP service, the CMDB,
//! a directory. Concrete implementations and test doubles share the trait;
//! a registry builds them from config.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use vigil_data::cache::{CachePool, CachePurpose};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("key not found")]
    NotFound,
    #[error("provider contract violation: {0}")]
    Contract(String),
}

#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn lookup(&self, key: &str) -> Result<serde_json::Value, ProviderError>;
}

/// HTTP provider: GET {base}/{key} -> JSON body
pub struct HttpContextProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpContextProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl ContextProvider for HttpContextProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &str) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        match response.status().as_u16() {
            404 => Err(ProviderError::NotFound),
            s if (200..300).contains(&s) => response
                .json()
                .await
                .map_err(|e| ProviderError::Contract(e.to_string())),
            s => Err(ProviderError::Unavailable(format!("status {s}"))),
        }
    }
}

/// Static provider: canned entries with an optional synthesized default.
/// The mock-friendly implementation that ships in the core.
pub struct StaticContextProvider {
    name: String,
    entries: HashMap<String, serde_json::Value>,
    default: Option<serde_json::Value>,
}

impl StaticContextProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
            default: None,
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[async_trait::async_trait]
impl ContextProvider for StaticContextProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &str) -> Result<serde_json::Value, ProviderError> {
        self.entries
            .get(key)
            .cloned()
            .or_else(|| self.default.clone())
            .ok_or(ProviderError::NotFound)
    }
}

/// Write-through cache wrapper, keyed `provider:key`, enrichment db
pub struct CachedProvider {
    inner: Arc<dyn ContextProvider>,
    cache: CachePool,
    ttl_secs: u64,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn ContextProvider>, cache: CachePool, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }
}

#[async_trait::async_trait]
impl ContextProvider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn lookup(&self, key: &str) -> Result<serde_json::Value, ProviderError> {
        let cache_key = format!("{}:{}", self.inner.name(), key);

        // Cache failures degrade to a direct lookup, never to a stage failure
        if let Ok(Some(hit)) = self
            .cache
            .get_json::<serde_json::Value>(CachePurpose::Enrichment, &cache_key)
            .await
        {
            metrics::counter!("context_cache_hits_total").increment(1);
            return Ok(hit);
        }
        metrics::counter!("context_cache_misses_total").increment(1);

        let value = self.inner.lookup(key).await?;
        if let Err(e) = self
            .cache
            .set_json(CachePurpose::Enrichment, &cache_key, &value, self.ttl_secs)
            .await
        {
            debug!(provider = self.inner.name(), error = %e, "cache write-through failed");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_provider_entry_and_default() {
        let provider = StaticContextProvider::new("cmdb")
            .with_entry("SRV-001", json!({"criticality": "critical"}))
            .with_default(json!({"criticality": "medium"}));

        let hit = provider.lookup("SRV-001").await.unwrap();
        assert_eq!(hit["criticality"], "critical");
        let miss = provider.lookup("SRV-999").await.unwrap();
        assert_eq!(miss["criticality"], "medium");
    }

    #[tokio::test]
    async fn static_provider_without_default_misses() {
        let provider = StaticContextProvider::new("directory");
        assert!(matches!(
            provider.lookup("nobody").await,
            Err(ProviderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn http_provider_shapes() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geo/8.8.8.8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"country": "US"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/geo/203.0.113.1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = HttpContextProvider::new(
            "geoip",
            format!("{}/geo", server.uri()),
            Duration::from_secs(2),
        );
        assert_eq!(provider.lookup("8.8.8.8").await.unwrap()["country"], "US");
        assert!(matches!(
            provider.lookup("203.0.113.1").await,
            Err(ProviderError::NotFound)
        ));
    }
}
