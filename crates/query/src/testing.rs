//! Fakes shared by the unit tests in this crate.

use async_trait::async_trait;
use extract::{ChatProvider, ChatRequest, GenerationError};
use index::{
    DeleteTarget, EmbeddingError, EmbeddingProvider, InMemoryStore, Metadata, MetadataFilter, RetrievalError, StoreStats,
    VectorMatch, VectorStore, keys,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FixedEmbedder {
    vector: Option<Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector: Some(vector) }
    }

    pub fn failing() -> Self {
        Self { vector: None }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.vector
            .clone()
            .ok_or_else(|| EmbeddingError::Status { status: 503, body: "embedding backend down".to_string() })
    }
    fn dimension(&self) -> usize {
        self.vector.as_ref().map_or(0, Vec::len)
    }
    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Never answers within a test's lifetime.
pub struct SlowEmbedder;

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![1.0, 0.0])
    }
    fn dimension(&self) -> usize {
        2
    }
    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Store whose entries have cosine similarity `score` against `[1, 0]`.
pub async fn seeded_store(entries: &[(&str, &str, f32)]) -> Arc<dyn VectorStore> {
    let store = InMemoryStore::new();
    for (i, (source, text, score)) in entries.iter().enumerate() {
        let vector = vec![*score, (1.0 - score * score).max(0.0).sqrt()];
        let metadata: Metadata = json!({
            (keys::CHUNK_TEXT): text,
            (keys::SOURCE): source,
            (keys::CHUNK_INDEX): i,
            (keys::DOCUMENT_ID): source,
        })
        .as_object()
        .cloned()
        .unwrap();
        store.upsert(&format!("chunk-{i}"), vector, metadata).await.unwrap();
    }
    Arc::new(store)
}

/// Chat provider with a canned reply that records every request.
pub struct ScriptedChat {
    name: String,
    reply: Result<String, ()>,
    calls: AtomicUsize,
    last: Mutex<Option<ChatRequest>>,
}

impl ScriptedChat {
    pub fn ok(name: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            reply: Err(()),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        self.reply
            .clone()
            .map_err(|_| GenerationError::Unauthorized("invalid api key".to_string()))
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn model(&self) -> &str {
        "scripted-1"
    }
}

/// Accepts writes but never answers a query within a test's lifetime.
pub struct SlowStore;

#[async_trait]
impl VectorStore for SlowStore {
    async fn query(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }

    async fn upsert(&self, _id: &str, _vector: Vec<f32>, _metadata: Metadata) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn delete(&self, _target: DeleteTarget) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, RetrievalError> {
        Ok(StoreStats::default())
    }
}

/// Chat provider that never replies within a test's lifetime.
pub struct HangingChat;

#[async_trait]
impl ChatProvider for HangingChat {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, GenerationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("too late".to_string())
    }
    fn name(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &str {
        "hanging-1"
    }
}
