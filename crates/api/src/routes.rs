use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use extract::{ExtractionResult, Extractor, ProviderRegistry};
use graph::{GraphExport, GraphSummary};
use index::{IndexReport, Indexer, StoreStats};
use ingest::Chunker;
use query::{DocumentGraphBuilder, Orchestrator, PipelineResult, ProcessSummary, summarize};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::metrics::{Metrics, MetricsSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub extractor: Arc<Extractor>,
    pub graph_builder: Arc<DocumentGraphBuilder>,
    pub indexer: Arc<Indexer>,
    pub chunker: Arc<Chunker>,
    pub providers: Arc<ProviderRegistry>,
    pub metrics: Arc<Metrics>,
    /// Cancelled on shutdown; in-flight questions stop at the next await.
    pub shutdown: CancellationToken,
}

impl AppState {
    fn provider_or_default(&self, requested: Option<String>) -> String {
        requested
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.providers.default_name().to_string())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ask", post(ask))
        .route("/extract", post(extract_text))
        .route("/graph", post(build_graph))
        .route("/documents/:id", delete(delete_document))
        .route("/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    state.metrics.record_request(response.status().is_success());
    response
}

// =============================================================================
// Errors
// =============================================================================

/// Handler error. Only the short message reaches the client.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unavailable(what: &str, err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "{what} unavailable");
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: format!("{what} unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    vector_store: String,
    default_provider: String,
    providers: Vec<String>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let vector_store = match state.indexer.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Vector store health check failed");
            "unavailable".to_string()
        }
    };

    Json(HealthResponse {
        status: "ok",
        vector_store,
        default_provider: state.providers.default_name().to_string(),
        providers: state.providers.names(),
    })
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    provider: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    request_id: String,
    summary: ProcessSummary,
    result: PipelineResult,
}

/// Pipeline failures are reported inside the result, not as HTTP errors.
async fn ask(State(state): State<AppState>, Json(req): Json<AskRequest>) -> Result<Json<AskResponse>, ApiError> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let request_id = Uuid::new_v4();
    let provider = state.provider_or_default(req.provider);
    let span = info_span!("ask", %request_id, provider = %provider);

    let start = Instant::now();
    let result = state
        .orchestrator
        .process_with_cancel(&question, &provider, &state.shutdown.child_token())
        .instrument(span)
        .await;
    state.metrics.record_ask(start.elapsed());

    Ok(Json(AskResponse {
        request_id: request_id.to_string(),
        summary: summarize(&result),
        result,
    }))
}

#[derive(Deserialize)]
struct ExtractRequest {
    text: String,
    provider: Option<String>,
}

#[derive(Serialize)]
struct ExtractResponse {
    entities_extracted: usize,
    relations_extracted: usize,
    extraction: ExtractionResult,
}

async fn extract_text(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    if req.text.trim().is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let provider = state.provider_or_default(req.provider);
    let start = Instant::now();
    let extraction = state.extractor.extract_entities_relations(&req.text, &provider).await;
    state.metrics.record_extract(start.elapsed(), extraction.entities.len());

    Ok(Json(ExtractResponse {
        entities_extracted: extraction.entities.len(),
        relations_extracted: extraction.relations.len(),
        extraction,
    }))
}

#[derive(Deserialize)]
struct GraphRequest {
    text: String,
    source: String,
    provider: Option<String>,
}

#[derive(Serialize)]
struct GraphResponse {
    document_id: String,
    chunks: usize,
    index: IndexReport,
    summary: GraphSummary,
    graph: GraphExport,
}

/// Chunk a document, index its chunks, and build its knowledge graph.
async fn build_graph(State(state): State<AppState>, Json(req): Json<GraphRequest>) -> Result<Json<GraphResponse>, ApiError> {
    if req.source.trim().is_empty() {
        return Err(ApiError::bad_request("source must not be empty"));
    }

    let chunks = ingest::ingest_text_with(&state.chunker, &req.text, &req.source);
    let Some(first) = chunks.first() else {
        return Err(ApiError::bad_request("text must not be empty"));
    };
    let document_id = first.doc_id.clone();
    let provider = state.provider_or_default(req.provider);

    let start = Instant::now();
    let report = state.indexer.index_chunks(&chunks).await;
    state.metrics.record_index(start.elapsed(), report.indexed, report.failed);

    let start = Instant::now();
    let knowledge_graph = state.graph_builder.build(&chunks, &provider).await;
    state.metrics.record_graph(start.elapsed(), knowledge_graph.entity_count());

    info!(
        document_id = %document_id,
        chunks = chunks.len(),
        indexed = report.indexed,
        entities = knowledge_graph.entity_count(),
        relations = knowledge_graph.relation_count(),
        "Document processed"
    );

    Ok(Json(GraphResponse {
        document_id,
        chunks: chunks.len(),
        index: report,
        summary: knowledge_graph.summary().clone(),
        graph: knowledge_graph.to_export(),
    }))
}

async fn delete_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state
        .indexer
        .delete_document(&id)
        .await
        .map_err(|e| ApiError::unavailable("vector store", e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct StatsResponse {
    vector_store: StoreStats,
    metrics: MetricsSnapshot,
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let vector_store = state
        .indexer
        .stats()
        .await
        .map_err(|e| ApiError::unavailable("vector store", e))?;

    Ok(Json(StatsResponse {
        vector_store,
        metrics: state.metrics.snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use extract::{ChatProvider, ChatRequest, GenerationError};
    use index::{EmbeddingError, EmbeddingProvider, InMemoryStore};
    use query::{ContextBuilder, PromptTemplates, ResponseGenerator, Searcher};
    use serde_json::Value;
    use tower::ServiceExt;

    const EXTRACTION_REPLY: &str = r#"{"entities":[{"id":"e1","type":"Organization","text":"Acme"},{"id":"e2","type":"Location","text":"Lisbon"}],"relations":[{"source_id":"e1","target_id":"e2","type":"located_in","text":"Acme is in Lisbon"}]}"#;

    /// Letter-frequency vectors, enough for cosine ranking in tests.
    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0; 4];
            for c in text.to_lowercase().chars() {
                match c {
                    'a' => v[0] += 1.0,
                    'e' => v[1] += 1.0,
                    'i' | 'o' | 'u' => v[2] += 1.0,
                    _ => v[3] += 0.1,
                }
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "letters"
        }
    }

    /// Answers extraction prompts with a fixed graph and everything else with a fixed answer.
    struct CannedChat;

    #[async_trait]
    impl ChatProvider for CannedChat {
        async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
            if request.user.contains("QUESTION:") {
                Ok("Acme is based in Lisbon.".to_string())
            } else {
                Ok(EXTRACTION_REPLY.to_string())
            }
        }

        fn name(&self) -> &str {
            "openai"
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    fn test_state() -> AppState {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(LetterEmbedder);
        let store = Arc::new(InMemoryStore::new());
        let providers = Arc::new(ProviderRegistry::new(Arc::new(CannedChat)));

        let generator = ResponseGenerator::new(providers.clone(), PromptTemplates::default());
        let searcher = Searcher::new(embedder.clone(), store.clone());
        let extractor = Arc::new(Extractor::new(providers.clone(), extract::ExtractionConfig::default()));

        AppState {
            orchestrator: Arc::new(Orchestrator::new(searcher, ContextBuilder::default(), generator)),
            graph_builder: Arc::new(DocumentGraphBuilder::new(extractor.clone())),
            extractor,
            indexer: Arc::new(Indexer::new(embedder, store)),
            chunker: Arc::new(Chunker::default()),
            providers,
            metrics: Metrics::new(),
            shutdown: CancellationToken::new(),
        }
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_providers() {
        let (status, body) = send(router(test_state()), Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vector_store"], "ok");
        assert_eq!(body["default_provider"], "openai");
    }

    #[tokio::test]
    async fn test_ask_rejects_blank_question() {
        let (status, body) = send(
            router(test_state()),
            Method::POST,
            "/ask",
            Some(json!({ "question": "   " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "question must not be empty");
    }

    #[tokio::test]
    async fn test_ask_on_empty_store_reports_context_failure() {
        let (status, body) = send(
            router(test_state()),
            Method::POST,
            "/ask",
            Some(json!({ "question": "Where is Acme?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["success"], false);
        assert_eq!(body["result"]["failed_at"], "context");
    }

    #[tokio::test]
    async fn test_graph_then_ask_then_stats() {
        let state = test_state();

        let (status, body) = send(
            router(state.clone()),
            Method::POST,
            "/graph",
            Some(json!({ "text": "Acme is a company based in Lisbon.", "source": "acme.txt" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunks"], 1);
        assert_eq!(body["index"]["indexed"], 1);
        assert_eq!(body["summary"]["entity_count"], 2);
        assert_eq!(body["summary"]["relation_count"], 1);
        assert_eq!(body["graph"]["nodes"][0]["id"], "c0_e1");

        let (status, body) = send(
            router(state.clone()),
            Method::POST,
            "/ask",
            Some(json!({ "question": "Where is Acme?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["success"], true);
        assert_eq!(body["result"]["final_answer"], "Acme is based in Lisbon.");
        assert_eq!(body["result"]["steps"]["sources"]["document_list"][0], "acme.txt");

        let (status, body) = send(router(state), Method::GET, "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vector_store"]["total_vector_count"], 1);
        assert_eq!(body["metrics"]["chunks_indexed"], 1);
        assert_eq!(body["metrics"]["successful_requests"], 2);
    }

    #[tokio::test]
    async fn test_delete_document_removes_its_chunks() {
        let state = test_state();
        let (_, body) = send(
            router(state.clone()),
            Method::POST,
            "/graph",
            Some(json!({ "text": "Acme is a company based in Lisbon.", "source": "acme.txt" })),
        )
        .await;
        let document_id = body["document_id"].as_str().unwrap().to_string();

        let (status, _) = send(
            router(state.clone()),
            Method::DELETE,
            &format!("/documents/{document_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let stats = state.indexer.stats().await.unwrap();
        assert_eq!(stats.total_vector_count, 0);
    }

    #[tokio::test]
    async fn test_extract_counts_entities() {
        let (status, body) = send(
            router(test_state()),
            Method::POST,
            "/extract",
            Some(json!({ "text": "Acme is in Lisbon." })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entities_extracted"], 2);
        assert_eq!(body["extraction"]["relations"][0]["type"], "located_in");
    }
}
