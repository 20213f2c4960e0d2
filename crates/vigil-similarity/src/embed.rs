//! Embedding providers
//!
//! The real path is an HTTP sentence-transformer inference endpoint. The
//! feature-hashing embedder is the deterministic in-process double that
//! ships in the core for tests and offline runs.

use sha2::{Digest, Sha256};
use thiserror::Error;

use vigil_data::vector::EMBEDDING_DIM;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Http(String),
    #[error("embedding contract violation: {0}")]
    Contract(String),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    fn dimension(&self) -> usize;
}

/// Deterministic feature-hashing embedder.
///
/// Tokens hash into buckets with a sign bit; the result is L2-normalized so
/// cosine scores behave. Identical text always embeds identically.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket =
                u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                    % self.dimension;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// HTTP embedder against a sentence-transformer inference endpoint
/// (text-embeddings-inference wire shape: `{"inputs": ...}` -> `[[f32]]`).
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            dimension,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "inputs": text }))
            .send()
            .await
            .map_err(|e| EmbedError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbedError::Http(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let rows: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| EmbedError::Contract(e.to_string()))?;
        let embedding = rows
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Contract("empty embedding response".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(EmbedError::Contract(format!(
                "expected {} dims, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("EICAR detected on SRV-001").await.unwrap();
        let b = embedder.embed("EICAR detected on SRV-001").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_text_embeds_differently() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("malware high eicar").await.unwrap();
        let b = embedder.embed("phishing low credential").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::default();
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn http_embedder_round_trip() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let row: Vec<f32> = vec![0.5; 4];
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![row.clone()]))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(format!("{}/embed", server.uri()), 4);
        let embedding = embedder.embed("anything").await.unwrap();
        assert_eq!(embedding, row);
    }

    #[tokio::test]
    async fn http_embedder_rejects_wrong_dimension() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![vec![0.5f32; 3]]))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(server.uri(), 4);
        assert!(matches!(
            embedder.embed("anything").await,
            Err(EmbedError::Contract(_))
        ));
    }
}
