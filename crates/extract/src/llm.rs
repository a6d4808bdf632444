//! Chat-completion providers.
//!
//! Every backend is reached through [`ChatProvider::complete`], whatever its
//! wire protocol. Retries for transient failures happen inside each client;
//! callers only ever see the final outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0} API key is not configured")]
    MissingCredentials(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::RateLimited(_)
            | GenerationError::Timeout(_)
            | GenerationError::Transport(_) => true,
            GenerationError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => GenerationError::Unauthorized(body),
            429 => GenerationError::RateLimited(body),
            code => GenerationError::Status { status: code, body },
        }
    }

    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout(timeout)
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

/// One interchangeable chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError>;

    /// Registry key and display name, e.g. "openai".
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// Connection settings shared by the HTTP providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Send a JSON body and return the parsed JSON response, mapping HTTP
/// failures onto [`GenerationError`].
async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
    timeout: Duration,
) -> Result<Value, GenerationError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| GenerationError::from_reqwest(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        return Err(GenerationError::from_status(status, body));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))
}

// =============================================================================
// OpenAI-style (bearer auth, choices envelope)
// =============================================================================

#[derive(Clone)]
pub struct OpenAiChat {
    config: ProviderConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiChat {
    pub fn new(config: ProviderConfig, retry: RetryPolicy) -> Self {
        let client = build_client(config.timeout());
        Self { config, client, retry }
    }

    pub fn default_config(api_key: Option<String>) -> ProviderConfig {
        ProviderConfig {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o".to_string(),
            api_key,
            timeout_secs: 30,
        }
    }

    async fn send(&self, api_key: &str, body: &Value) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = self.client.post(&url).bearer_auth(api_key);
        let response = post_json(request, body, self.config.timeout()).await?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GenerationError::MalformedResponse("missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::MissingCredentials("OpenAI".to_string()))?;

        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        messages.push(json!({"role": "user", "content": request.user}));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        debug!(provider = "openai", model = %self.config.model, prompt_len = request.user.len(), "Sending chat completion");
        self.retry
            .retry_if("openai_chat", GenerationError::is_retryable, || self.send(api_key, &body))
            .await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// =============================================================================
// Anthropic-style (x-api-key header, content blocks envelope)
// =============================================================================

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicChat {
    config: ProviderConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl AnthropicChat {
    pub fn new(config: ProviderConfig, retry: RetryPolicy) -> Self {
        let client = build_client(config.timeout());
        Self { config, client, retry }
    }

    pub fn default_config(api_key: Option<String>) -> ProviderConfig {
        ProviderConfig {
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key,
            timeout_secs: 30,
        }
    }

    async fn send(&self, api_key: &str, body: &Value) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response = post_json(request, body, self.config.timeout()).await?;

        response["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find_map(|b| b["text"].as_str()))
            .map(str::to_string)
            .ok_or_else(|| GenerationError::MalformedResponse("missing text content block".to_string()))
    }
}

#[async_trait]
impl ChatProvider for AnthropicChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::MissingCredentials("Anthropic".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
        });

        debug!(provider = "claude", model = %self.config.model, prompt_len = request.user.len(), "Sending message");
        self.retry
            .retry_if("anthropic_messages", GenerationError::is_retryable, || self.send(api_key, &body))
            .await
    }

    fn name(&self) -> &str {
        "claude"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// =============================================================================
// Ollama (local, unauthenticated)
// =============================================================================

#[derive(Clone)]
pub struct OllamaChat {
    config: ProviderConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OllamaChat {
    pub fn new(config: ProviderConfig, retry: RetryPolicy) -> Self {
        let client = build_client(config.timeout());
        Self { config, client, retry }
    }

    pub fn default_config() -> ProviderConfig {
        ProviderConfig {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }

    async fn send(&self, body: &Value) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let response = post_json(self.client.post(&url), body, self.config.timeout()).await?;

        response["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GenerationError::MalformedResponse("missing message.content".to_string()))
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.config.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        debug!(provider = "ollama", model = %self.config.model, prompt_len = request.user.len(), "Sending chat");
        self.retry
            .retry_if("ollama_chat", GenerationError::is_retryable, || self.send(&body))
            .await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Providers selectable by name. Unknown names resolve to the default.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    default_key: String,
}

impl ProviderRegistry {
    /// `default` is registered under its own name and becomes the fallback.
    pub fn new(default: Arc<dyn ChatProvider>) -> Self {
        let default_key = default.name().to_lowercase();
        let mut providers = HashMap::new();
        providers.insert(default_key.clone(), default);
        Self { providers, default_key }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(provider.name().to_lowercase(), provider);
        self
    }

    /// Register an extra key for an existing provider, e.g. "anthropic" for "claude".
    pub fn with_alias(mut self, alias: &str, target: &str) -> Self {
        if let Some(provider) = self.providers.get(&target.to_lowercase()).cloned() {
            self.providers.insert(alias.to_lowercase(), provider);
        }
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default_key
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resolve(&self, name: &str) -> Arc<dyn ChatProvider> {
        let key = name.trim().to_lowercase();
        if let Some(provider) = self.providers.get(&key) {
            return provider.clone();
        }
        warn!(requested = name, fallback = %self.default_key, "Unknown provider, using default");
        self.providers[&self.default_key].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ChatProvider for Named {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
        fn name(&self) -> &str {
            self.0
        }
        fn model(&self) -> &str {
            "test"
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(Named("openai")))
            .with_provider(Arc::new(Named("claude")))
            .with_alias("anthropic", "claude")
    }

    #[test]
    fn test_resolve_known_names() {
        let registry = registry();
        assert_eq!(registry.resolve("claude").name(), "claude");
        assert_eq!(registry.resolve(" Claude ").name(), "claude");
        assert_eq!(registry.resolve("anthropic").name(), "claude");
        assert_eq!(registry.resolve("OPENAI").name(), "openai");
    }

    #[test]
    fn test_unknown_name_falls_back_to_default() {
        let registry = registry();
        assert_eq!(registry.resolve("mistral").name(), "openai");
        assert_eq!(registry.resolve("").name(), "openai");
        assert!(!registry.contains("mistral"));
        assert_eq!(registry.names(), vec!["anthropic", "claude", "openai"]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GenerationError::RateLimited("slow down".into()).is_retryable());
        assert!(GenerationError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!GenerationError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!GenerationError::Unauthorized("bad key".into()).is_retryable());
        assert!(!GenerationError::MissingCredentials("OpenAI".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let provider = OpenAiChat::new(
            ProviderConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                ..OpenAiChat::default_config(None)
            },
            RetryPolicy::none(),
        );
        let request = ChatRequest {
            system: String::new(),
            user: "hi".to_string(),
            temperature: 0.0,
            max_tokens: 10,
        };
        let err = provider.complete(&request).await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingCredentials(_)));
    }
}
