use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EmbeddingError;

/// Text to fixed-dimension vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Expected vector length for this model.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub dimension: usize,
    pub timeout_secs: u64,
}

fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EmbeddingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(EmbeddingError::Status { status: status.as_u16(), body })
}

fn non_empty(embedding: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    if embedding.is_empty() {
        Err(EmbeddingError::EmptyVector)
    } else {
        Ok(embedding)
    }
}

/// OpenAI `/v1/embeddings` client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }

    pub fn default_config(api_key: Option<String>) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-ada-002".to_string(),
            api_key,
            dimension: 1536,
            timeout_secs: 15,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::MissingCredentials("OpenAI".to_string()))?;

        let url = format!("{}/v1/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = OpenAiEmbeddingRequest { model: &self.config.model, input: text };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let parsed: OpenAiEmbeddingResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::MalformedResponse("empty data array".to_string()))?;

        non_empty(embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Ollama `/api/embeddings` client.
#[derive(Clone)]
pub struct OllamaEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }

    pub fn default_config() -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            dimension: 768,
            timeout_secs: 30,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = OllamaEmbeddingRequest { model: &self.config.model, prompt: text };

        let response = self.client.post(&url).json(&request).send().await?;

        let parsed: OllamaEmbeddingResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;

        non_empty(parsed.embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, api_key: Option<&str>) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: server.uri(),
            model: "test-embed".to_string(),
            api_key: api_key.map(str::to_string),
            dimension: 3,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_openai_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}],
                "model": "test-embed"
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(config(&server, Some("sk-test")));
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_ollama_empty_vector_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"embedding": []})))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(config(&server, None));
        assert!(matches!(embedder.embed("hello").await, Err(EmbeddingError::EmptyVector)));
    }

    #[tokio::test]
    async fn test_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(config(&server, Some("sk")));
        match embedder.embed("hello").await {
            Err(EmbeddingError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
