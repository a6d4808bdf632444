use index::{EmbeddingError, EmbeddingProvider, RetrievalError, VectorMatch, VectorStore, keys};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_TOP_K: usize = 5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const UNKNOWN_SOURCE: &str = "Unknown";

/// A chunk returned by retrieval, scored against one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    /// Similarity clamped into [0, 1].
    pub score: f32,
    pub source: String,
    pub chunk_index: usize,
}

impl RetrievedChunk {
    pub fn from_match(m: VectorMatch) -> Self {
        let text = string_field(&m.metadata, &[keys::CHUNK_TEXT, "text"]).unwrap_or_default();
        let source = string_field(&m.metadata, &[keys::SOURCE, "filename"])
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
        let chunk_index = m
            .metadata
            .get(keys::CHUNK_INDEX)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        Self {
            id: m.id,
            text,
            score: clamp_score(m.score),
            source,
            chunk_index,
        }
    }
}

fn string_field(metadata: &index::Metadata, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn clamp_score(score: f32) -> f32 {
    if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
}

/// Diagnostic for the search step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchInfo {
    pub success: bool,
    pub error: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub question_length: usize,
    pub total_found: usize,
    pub top_scores: Vec<f32>,
    pub avg_score: f32,
    pub unique_sources: usize,
    pub duration_ms: u64,
}

/// Vectorizes questions and fetches the nearest chunks.
pub struct Searcher {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    timeout: Duration,
}

impl Searcher {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            top_k: DEFAULT_TOP_K,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Upper bound on each remote call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn vectorize(&self, question: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = tokio::time::timeout(self.timeout, self.embedder.embed(question))
            .await
            .map_err(|_| EmbeddingError::Timeout)??;
        debug!(dimensions = vector.len(), "Question vectorized");
        Ok(vector)
    }

    /// Chunks in the store's own descending-similarity order.
    pub async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let matches = tokio::time::timeout(self.timeout, self.store.query(vector, top_k, None))
            .await
            .map_err(|_| RetrievalError::Timeout)??;
        Ok(matches.into_iter().map(RetrievedChunk::from_match).collect())
    }

    /// Vectorize then search. Failures come back as an empty list with the
    /// cause recorded in the returned info.
    pub async fn search_question(&self, question: &str) -> (Vec<RetrievedChunk>, SearchInfo) {
        let start = Instant::now();
        let mut info = SearchInfo {
            model: self.embedder.model_name().to_string(),
            question_length: question.chars().count(),
            ..Default::default()
        };

        let vector = match self.vectorize(question).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "Failed to vectorize question");
                info.error = Some(e.to_string());
                info.duration_ms = start.elapsed().as_millis() as u64;
                return (Vec::new(), info);
            }
        };
        info.dimensions = vector.len();

        let chunks = match self.search(&vector, self.top_k).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Semantic search failed");
                info.error = Some(e.to_string());
                info.duration_ms = start.elapsed().as_millis() as u64;
                return (Vec::new(), info);
            }
        };

        info.success = true;
        info.total_found = chunks.len();
        info.top_scores = chunks.iter().take(3).map(|c| c.score).collect();
        if !chunks.is_empty() {
            info.avg_score = chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32;
        }
        info.unique_sources = chunks.iter().map(|c| c.source.as_str()).collect::<HashSet<_>>().len();
        info.duration_ms = start.elapsed().as_millis() as u64;

        info!(found = info.total_found, duration_ms = info.duration_ms, "Found similar chunks");
        (chunks, info)
    }
}
