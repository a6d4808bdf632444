use anyhow::{Context, Result};
use extract::ExtractionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Application configuration, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub embeddings: EmbeddingsConfig,
    pub vector_store: VectorStoreConfig,
    pub retrieval: RetrievalConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Used for unknown or missing provider names.
    pub default_provider: String,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    Ollama,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => anyhow::bail!("unknown embedding backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Qdrant,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown vector store backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub backend: StoreBackend,
    pub qdrant_url: String,
    pub collection: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_context_length: usize,
    /// Applied to the embedding and vector store calls of a question.
    pub timeout_secs: u64,
    pub prompts_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            providers: ProvidersConfig {
                default_provider: "openai".to_string(),
                openai_api_key: None,
                openai_model: "gpt-4o".to_string(),
                anthropic_api_key: None,
                anthropic_model: "claude-sonnet-4-20250514".to_string(),
                ollama_url: "http://localhost:11434".to_string(),
                ollama_model: "llama3".to_string(),
                request_timeout_secs: 60,
            },
            embeddings: EmbeddingsConfig {
                backend: EmbeddingBackend::OpenAi,
                model: "text-embedding-ada-002".to_string(),
                dimension: 1536,
                timeout_secs: 15,
            },
            vector_store: VectorStoreConfig {
                backend: StoreBackend::Qdrant,
                qdrant_url: "http://localhost:6333".to_string(),
                collection: "documents".to_string(),
                timeout_secs: 10,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                max_context_length: 4000,
                timeout_secs: 30,
                prompts_file: None,
            },
            extraction: ExtractionConfig::default(),
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
        }
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables; a `.env` file is loaded
    /// first when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            config.server.host = v;
        }
        set_parsed(&get, "PORT", &mut config.server.port)?;

        let providers = &mut config.providers;
        if let Some(v) = get("LLM_DEFAULT") {
            providers.default_provider = v.trim().to_lowercase();
        }
        providers.openai_api_key = get("OPENAI_API_KEY");
        providers.anthropic_api_key = get("ANTHROPIC_API_KEY");
        if let Some(v) = get("OPENAI_MODEL") {
            providers.openai_model = v;
        }
        if let Some(v) = get("ANTHROPIC_MODEL") {
            providers.anthropic_model = v;
        }
        if let Some(v) = get("OLLAMA_URL") {
            providers.ollama_url = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            providers.ollama_model = v;
        }
        set_parsed(&get, "LLM_TIMEOUT_SECS", &mut providers.request_timeout_secs)?;

        set_parsed(&get, "EMBEDDING_BACKEND", &mut config.embeddings.backend)?;
        if let Some(v) = get("EMBEDDING_MODEL") {
            config.embeddings.model = v;
        }
        set_parsed(&get, "EMBEDDING_DIMENSION", &mut config.embeddings.dimension)?;
        set_parsed(&get, "EMBEDDING_TIMEOUT_SECS", &mut config.embeddings.timeout_secs)?;

        set_parsed(&get, "VECTOR_STORE", &mut config.vector_store.backend)?;
        if let Some(v) = get("QDRANT_URL") {
            config.vector_store.qdrant_url = v;
        }
        if let Some(v) = get("QDRANT_COLLECTION") {
            config.vector_store.collection = v;
        }

        set_parsed(&get, "TOP_K", &mut config.retrieval.top_k)?;
        set_parsed(&get, "MAX_CONTEXT_LENGTH", &mut config.retrieval.max_context_length)?;
        set_parsed(&get, "RETRIEVAL_TIMEOUT_SECS", &mut config.retrieval.timeout_secs)?;
        config.retrieval.prompts_file = get("PROMPTS_FILE").map(PathBuf::from);

        set_parsed(&get, "EXTRACTION_MAX_CHUNKS", &mut config.extraction.max_chunks)?;
        set_parsed(&get, "EXTRACTION_CONCURRENCY", &mut config.extraction.concurrency)?;
        set_parsed(&get, "EXTRACTION_MAX_INPUT_CHARS", &mut config.extraction.max_input_chars)?;
        if let Some(v) = get("EXTRACTION_LANGUAGE") {
            config.extraction.language = v;
        }

        set_parsed(&get, "LLM_MAX_RETRIES", &mut config.retry.max_retries)?;
        set_parsed(&get, "LLM_INITIAL_BACKOFF_MS", &mut config.retry.initial_backoff_ms)?;
        set_parsed(&get, "LLM_MAX_BACKOFF_MS", &mut config.retry.max_backoff_ms)?;

        Ok(config)
    }

    pub fn retry_policy(&self) -> extract::RetryPolicy {
        extract::RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }
}

fn set_parsed<T>(get: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{name} has an invalid value: {raw:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.providers.default_provider, "openai");
        assert!(config.providers.openai_api_key.is_none());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.max_context_length, 4000);
        assert_eq!(config.extraction.max_chunks, 5);
        assert_eq!(config.vector_store.backend, StoreBackend::Qdrant);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LLM_DEFAULT", " Claude "),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("TOP_K", "8"),
            ("VECTOR_STORE", "memory"),
            ("EMBEDDING_BACKEND", "ollama"),
            ("OPENAI_API_KEY", "  "),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.providers.default_provider, "claude");
        assert_eq!(config.providers.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert!(config.providers.openai_api_key.is_none());
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.vector_store.backend, StoreBackend::Memory);
        assert_eq!(config.embeddings.backend, EmbeddingBackend::Ollama);
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[("TOP_K", "many")])).unwrap_err();
        assert!(format!("{err:#}").contains("TOP_K"));
    }

    #[test]
    fn test_api_keys_are_not_serialized() {
        let config = AppConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-secret")])).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
