//! Threat source capability
//!
//! `query(ioc, ioc_type) -> {detected, score, raw}`. Vendor wire shapes are
//! normalized here; everything downstream works on verdicts and weights.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vigil_core::model::{Ioc, IocType};

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport or provider failure; counts against the circuit breaker
    #[error("source failure: {0}")]
    Failed(String),
    /// Per-source timeout; contributes zero weight, breaker unaffected
    #[error("source timed out")]
    TimedOut,
    /// Unusable response body
    #[error("source contract violation: {0}")]
    Contract(String),
}

/// Normalized per-source answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVerdict {
    pub detected: bool,
    /// 0-100
    pub score: f64,
    pub raw: serde_json::Value,
}

impl SourceVerdict {
    pub fn clean() -> Self {
        Self {
            detected: false,
            score: 0.0,
            raw: serde_json::Value::Null,
        }
    }
}

#[async_trait::async_trait]
pub trait ThreatSource: Send + Sync {
    fn name(&self) -> &str;
    fn weight(&self) -> f64;
    async fn query(&self, ioc: &Ioc) -> Result<SourceVerdict, SourceError>;
}

/// Vendor selector for the HTTP source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    VirusTotal,
    Otx,
    AbuseCh,
}

impl Vendor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "virustotal" => Some(Self::VirusTotal),
            "otx" => Some(Self::Otx),
            "abusech" => Some(Self::AbuseCh),
            _ => None,
        }
    }
}

/// HTTP-backed source for the three shipped vendors
pub struct HttpThreatSource {
    name: String,
    vendor: Vendor,
    weight: f64,
    endpoint: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpThreatSource {
    pub fn new(
        name: impl Into<String>,
        vendor: Vendor,
        weight: f64,
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            vendor,
            weight,
            endpoint: endpoint.into(),
            api_key,
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn vt_path(ioc: &Ioc) -> String {
        match ioc.ioc_type {
            IocType::Ip => format!("/ip_addresses/{}", ioc.value),
            IocType::Domain => format!("/domains/{}", ioc.value),
            IocType::Url => format!("/urls/{}", ioc.value),
            IocType::Md5 | IocType::Sha1 | IocType::Sha256 => format!("/files/{}", ioc.value),
        }
    }

    fn otx_path(ioc: &Ioc) -> String {
        let section = match ioc.ioc_type {
            IocType::Ip => "IPv4",
            IocType::Domain => "domain",
            IocType::Url => "url",
            IocType::Md5 | IocType::Sha1 | IocType::Sha256 => "file",
        };
        format!("/indicators/{}/{}/general", section, ioc.value)
    }

    async fn query_vendor(&self, ioc: &Ioc) -> Result<SourceVerdict, SourceError> {
        let base = self.endpoint.trim_end_matches('/');
        let request = match self.vendor {
            Vendor::VirusTotal => {
                let mut builder = self.client.get(format!("{base}{}", Self::vt_path(ioc)));
                if let Some(key) = &self.api_key {
                    builder = builder.header("x-apikey", key.expose_secret());
                }
                builder
            }
            Vendor::Otx => {
                let mut builder = self.client.get(format!("{base}{}", Self::otx_path(ioc)));
                if let Some(key) = &self.api_key {
                    builder = builder.header("X-OTX-API-KEY", key.expose_secret());
                }
                builder
            }
            Vendor::AbuseCh => self.client.post(base.to_string()).json(&serde_json::json!({
                "query": "search_ioc",
                "search_term": ioc.value,
            })),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::TimedOut
            } else {
                SourceError::Failed(e.to_string())
            }
        })?;

        let status = response.status();
        // Vendors answer unknown IOCs with 404: that is a clean verdict
        if status.as_u16() == 404 {
            return Ok(SourceVerdict::clean());
        }
        if !status.is_success() {
            return Err(SourceError::Failed(format!("status {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Contract(e.to_string()))?;
        Ok(self.parse_body(body))
    }

    fn parse_body(&self, body: serde_json::Value) -> SourceVerdict {
        match self.vendor {
            Vendor::VirusTotal => {
                let stats = &body["data"]["attributes"]["last_analysis_stats"];
                let malicious = stats["malicious"].as_f64().unwrap_or(0.0);
                let suspicious = stats["suspicious"].as_f64().unwrap_or(0.0);
                let harmless = stats["harmless"].as_f64().unwrap_or(0.0);
                let undetected = stats["undetected"].as_f64().unwrap_or(0.0);
                let total = malicious + suspicious + harmless + undetected;
                let score = if total > 0.0 {
                    ((malicious + 0.5 * suspicious) / total * 100.0).clamp(0.0, 100.0)
                } else {
                    0.0
                };
                SourceVerdict {
                    detected: malicious > 0.0,
                    score,
                    raw: body,
                }
            }
            Vendor::Otx => {
                let pulses = body["pulse_info"]["count"].as_f64().unwrap_or(0.0);
                let score = (pulses * 10.0).clamp(0.0, 100.0);
                SourceVerdict {
                    detected: pulses > 0.0,
                    score,
                    raw: body,
                }
            }
            Vendor::AbuseCh => {
                let found = body["query_status"].as_str() == Some("ok");
                let confidence = body["data"][0]["confidence_level"].as_f64().unwrap_or(0.0);
                SourceVerdict {
                    detected: found && confidence > 0.0,
                    score: if found { confidence.clamp(0.0, 100.0) } else { 0.0 },
                    raw: body,
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ThreatSource for HttpThreatSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn query(&self, ioc: &Ioc) -> Result<SourceVerdict, SourceError> {
        match tokio::time::timeout(self.timeout, self.query_vendor(ioc)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::TimedOut),
        }
    }
}

/// Canned source for tests and offline runs
pub struct StaticThreatSource {
    name: String,
    weight: f64,
    verdict: Option<SourceVerdict>,
    delay: Option<Duration>,
    budget: Duration,
}

impl StaticThreatSource {
    pub fn new(name: impl Into<String>, weight: f64, verdict: Option<SourceVerdict>) -> Self {
        Self {
            name: name.into(),
            weight,
            verdict,
            delay: None,
            budget: Duration::from_secs(10),
        }
    }

    /// Sleep before answering; sleeping past the budget times out
    pub fn with_delay(mut self, delay: Duration, budget: Duration) -> Self {
        self.delay = Some(delay);
        self.budget = budget;
        self
    }
}

#[async_trait::async_trait]
impl ThreatSource for StaticThreatSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn query(&self, _ioc: &Ioc) -> Result<SourceVerdict, SourceError> {
        if let Some(delay) = self.delay {
            if delay >= self.budget {
                tokio::time::sleep(self.budget).await;
                return Err(SourceError::TimedOut);
            }
            tokio::time::sleep(delay).await;
        }
        match &self.verdict {
            Some(verdict) => Ok(verdict.clone()),
            None => Err(SourceError::Failed("configured to fail".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn virustotal_scoring_from_analysis_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/44d88612fea8a8f36de82e1278abb02f"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"attributes": {"last_analysis_stats": {
                    "malicious": 60, "suspicious": 0, "harmless": 10, "undetected": 30
                }}}
            })))
            .mount(&server)
            .await;

        let source = HttpThreatSource::new(
            "virustotal",
            Vendor::VirusTotal,
            0.4,
            server.uri(),
            None,
            Duration::from_secs(2),
        );
        let verdict = source
            .query(&Ioc::new("44d88612fea8a8f36de82e1278abb02f", IocType::Md5))
            .await
            .unwrap();
        assert!(verdict.detected);
        assert!((verdict.score - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_ioc_404_is_clean() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpThreatSource::new(
            "otx",
            Vendor::Otx,
            0.3,
            server.uri(),
            None,
            Duration::from_secs(2),
        );
        let verdict = source
            .query(&Ioc::new("8.8.8.8", IocType::Ip))
            .await
            .unwrap();
        assert!(!verdict.detected);
        assert_eq!(verdict.score, 0.0);
    }

    #[tokio::test]
    async fn provider_5xx_is_a_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = HttpThreatSource::new(
            "abusech",
            Vendor::AbuseCh,
            0.3,
            server.uri(),
            None,
            Duration::from_secs(2),
        );
        assert!(matches!(
            source.query(&Ioc::new("1.2.3.4", IocType::Ip)).await,
            Err(SourceError::Failed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn static_source_delay_past_budget_times_out() {
        let source = StaticThreatSource::new("slow", 0.3, Some(SourceVerdict::clean()))
            .with_delay(Duration::from_secs(30), Duration::from_secs(10));
        assert!(matches!(
            source.query(&Ioc::new("8.8.8.8", IocType::Ip)).await,
            Err(SourceError::TimedOut)
        ));
    }
}
