use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RetrievalError;
use crate::vector_store::{
    DeleteTarget, Metadata, MetadataFilter, StoreStats, VectorMatch, VectorStore, cosine_similarity,
};

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    metadata: Metadata,
}

/// Brute-force cosine store held in process memory.
///
/// Ties in score keep insertion order.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<StoredVector>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_dimension(entries: &[StoredVector], vector: &[f32]) -> Result<(), RetrievalError> {
    match entries.first() {
        Some(first) if first.vector.len() != vector.len() => Err(RetrievalError::DimensionMismatch {
            expected: first.vector.len(),
            actual: vector.len(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        let entries = self.entries.read().await;
        check_dimension(&entries, vector)?;

        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.is_none_or(|f| f.matches(&e.metadata)))
            .map(|(i, e)| (i, cosine_similarity(vector, &e.vector)))
            .collect();

        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| VectorMatch {
                id: entries[i].id.clone(),
                score,
                metadata: entries[i].metadata.clone(),
            })
            .collect())
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<(), RetrievalError> {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.iter_mut().find(|e| e.id == id) {
            existing.vector = vector;
            existing.metadata = metadata;
            return Ok(());
        }

        check_dimension(&entries, &vector)?;
        entries.push(StoredVector { id: id.to_string(), vector, metadata });
        Ok(())
    }

    async fn delete(&self, target: DeleteTarget) -> Result<(), RetrievalError> {
        let mut entries = self.entries.write().await;
        match target {
            DeleteTarget::Id(id) => entries.retain(|e| e.id != id),
            DeleteTarget::Filter(filter) => entries.retain(|e| !filter.matches(&e.metadata)),
            DeleteTarget::All => entries.clear(),
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, RetrievalError> {
        let entries = self.entries.read().await;
        Ok(StoreStats {
            total_vector_count: entries.len(),
            dimension: entries.first().map(|e| e.vector.len()),
        })
    }
}
