pub mod embeddings;
pub mod error;
pub mod memory;
pub mod qdrant;
pub mod vector_store;

pub use embeddings::{EmbeddingConfig, EmbeddingProvider, OllamaEmbedder, OpenAiEmbedder};
pub use error::{EmbeddingError, RetrievalError};
pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;
pub use vector_store::{DeleteTarget, Metadata, MetadataFilter, StoreStats, VectorMatch, VectorStore};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

/// Metadata keys written for every indexed chunk.
pub mod keys {
    pub const CHUNK_TEXT: &str = "chunk_text";
    pub const SOURCE: &str = "source";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const DOCUMENT_ID: &str = "document_id";
}

/// Embeds chunks and keeps them in a vector store.
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    /// Embed and upsert each chunk. A chunk that fails is logged and counted
    /// and the rest still go through.
    pub async fn index_chunks(&self, chunks: &[ingest::Chunk]) -> IndexReport {
        let mut report = IndexReport::default();

        for chunk in chunks {
            match self.index_chunk(chunk).await {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %format!("{e:#}"), "Failed to index chunk");
                    report.failed += 1;
                }
            }
        }

        info!(
            indexed = report.indexed,
            failed = report.failed,
            model = self.embedder.model_name(),
            "Indexed chunks"
        );
        report
    }

    async fn index_chunk(&self, chunk: &ingest::Chunk) -> Result<()> {
        let vector = self
            .embedder
            .embed(&chunk.text)
            .await
            .context("embedding chunk")?;

        self.store
            .upsert(&chunk.chunk_id, vector, chunk_metadata(chunk))
            .await
            .context("upserting chunk")?;
        Ok(())
    }

    /// Remove every chunk that belongs to `document_id`.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.store
            .delete(DeleteTarget::Filter(MetadataFilter::eq(keys::DOCUMENT_ID, document_id)))
            .await
            .with_context(|| format!("deleting document {document_id}"))?;
        info!(document_id, "Deleted document");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.delete(DeleteTarget::All).await.context("clearing vector store")?;
        info!("Cleared vector store");
        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await.context("reading vector store stats")
    }
}

pub fn chunk_metadata(chunk: &ingest::Chunk) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(keys::CHUNK_TEXT.to_string(), Value::String(chunk.text.clone()));
    metadata.insert(keys::SOURCE.to_string(), Value::String(chunk.source.clone()));
    metadata.insert(keys::CHUNK_INDEX.to_string(), json!(chunk.chunk_index));
    metadata.insert(keys::DOCUMENT_ID.to_string(), Value::String(chunk.doc_id.clone()));
    metadata
}
