mod config;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use extract::{AnthropicChat, ChatProvider, Extractor, OllamaChat, OpenAiChat, ProviderConfig, ProviderRegistry, RetryPolicy};
use index::{EmbeddingConfig, EmbeddingProvider, InMemoryStore, Indexer, OllamaEmbedder, OpenAiEmbedder, QdrantStore, VectorStore};
use ingest::Chunker;
use query::{ContextBuilder, DocumentGraphBuilder, GenerationSettings, Orchestrator, PromptTemplates, ResponseGenerator, Searcher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, EmbeddingBackend, ProvidersConfig, StoreBackend};
use crate::metrics::Metrics;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_tracing();

    tracing::info!(
        default_provider = %config.providers.default_provider,
        vector_store = ?config.vector_store.backend,
        embeddings = ?config.embeddings.backend,
        "Starting RAG server"
    );

    let shutdown = CancellationToken::new();
    let state = build_state(&config, shutdown.clone()).await?;
    let app = routes::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested, cancelling in-flight questions");
    shutdown.cancel();
}

async fn build_state(config: &AppConfig, shutdown: CancellationToken) -> Result<AppState> {
    let retry = config.retry_policy();
    let providers = Arc::new(build_providers(&config.providers, retry.clone()));

    let embedder = build_embedder(config);
    let store = build_store(config).await?;

    let templates = config
        .retrieval
        .prompts_file
        .as_ref()
        .map(PromptTemplates::load)
        .unwrap_or_default();

    let searcher = Searcher::new(embedder.clone(), store.clone())
        .with_top_k(config.retrieval.top_k)
        .with_timeout(Duration::from_secs(config.retrieval.timeout_secs));
    let context_builder = ContextBuilder::new(config.retrieval.max_context_length);
    let generator = ResponseGenerator::new(providers.clone(), templates).with_settings(GenerationSettings {
        timeout: generation_timeout(config.providers.request_timeout_secs, &retry),
        ..Default::default()
    });

    let extractor = Arc::new(Extractor::new(providers.clone(), config.extraction.clone()));

    Ok(AppState {
        orchestrator: Arc::new(Orchestrator::new(searcher, context_builder, generator)),
        graph_builder: Arc::new(DocumentGraphBuilder::new(extractor.clone())),
        extractor,
        indexer: Arc::new(Indexer::new(embedder, store)),
        chunker: Arc::new(Chunker::default()),
        providers,
        metrics: Metrics::new(),
        shutdown,
    })
}

/// Every attempt may use the full per-request timeout.
fn generation_timeout(request_timeout_secs: u64, retry: &RetryPolicy) -> Duration {
    Duration::from_secs(request_timeout_secs * (retry.max_retries() as u64 + 1))
}

fn build_providers(config: &ProvidersConfig, retry: RetryPolicy) -> ProviderRegistry {
    let timeout_secs = config.request_timeout_secs;

    let openai: Arc<dyn ChatProvider> = Arc::new(OpenAiChat::new(
        ProviderConfig {
            model: config.openai_model.clone(),
            timeout_secs,
            ..OpenAiChat::default_config(config.openai_api_key.clone())
        },
        retry.clone(),
    ));
    let claude: Arc<dyn ChatProvider> = Arc::new(AnthropicChat::new(
        ProviderConfig {
            model: config.anthropic_model.clone(),
            timeout_secs,
            ..AnthropicChat::default_config(config.anthropic_api_key.clone())
        },
        retry.clone(),
    ));
    let ollama: Arc<dyn ChatProvider> = Arc::new(OllamaChat::new(
        ProviderConfig {
            base_url: config.ollama_url.clone(),
            model: config.ollama_model.clone(),
            api_key: None,
            timeout_secs,
        },
        retry,
    ));

    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set, openai calls will fail");
    }
    if config.anthropic_api_key.is_none() {
        tracing::warn!("ANTHROPIC_API_KEY not set, claude calls will fail");
    }

    let default = match config.default_provider.as_str() {
        "claude" | "anthropic" => claude.clone(),
        "ollama" => ollama.clone(),
        "openai" => openai.clone(),
        other => {
            tracing::warn!(requested = other, "Unknown default provider, using openai");
            openai.clone()
        }
    };

    ProviderRegistry::new(default)
        .with_provider(openai)
        .with_provider(claude)
        .with_provider(ollama)
        .with_alias("anthropic", "claude")
}

fn build_embedder(config: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    let settings = &config.embeddings;
    match settings.backend {
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(EmbeddingConfig {
            model: settings.model.clone(),
            dimension: settings.dimension,
            timeout_secs: settings.timeout_secs,
            ..OpenAiEmbedder::default_config(config.providers.openai_api_key.clone())
        })),
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::new(EmbeddingConfig {
            base_url: config.providers.ollama_url.clone(),
            model: settings.model.clone(),
            api_key: None,
            dimension: settings.dimension,
            timeout_secs: settings.timeout_secs,
        })),
    }
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    let settings = &config.vector_store;
    match settings.backend {
        StoreBackend::Qdrant => {
            let store = QdrantStore::new(
                settings.qdrant_url.clone(),
                settings.collection.clone(),
                config.embeddings.dimension,
                settings.timeout_secs,
            );
            store
                .init_collection()
                .await
                .with_context(|| format!("Failed to initialize Qdrant collection {}", settings.collection))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory vector store, indexed chunks are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_configured_default_and_alias() {
        let config = ProvidersConfig {
            default_provider: "anthropic".to_string(),
            ..AppConfig::default().providers
        };
        let registry = build_providers(&config, RetryPolicy::none());

        assert_eq!(registry.default_name(), "claude");
        assert_eq!(registry.resolve("anthropic").name(), "claude");
        assert_eq!(registry.resolve("ollama").name(), "ollama");
        assert_eq!(registry.resolve("unknown").name(), "claude");
    }

    #[test]
    fn test_generation_timeout_covers_retries() {
        let retry = RetryPolicy::new(2, 100, 1000);
        assert_eq!(generation_timeout(60, &retry), Duration::from_secs(180));
    }
}
