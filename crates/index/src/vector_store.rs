use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RetrievalError;

pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Conjunction of `key == value` conditions on metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub equals: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { equals: vec![(key.into(), value.into())] }
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Id(String),
    Filter(MetadataFilter),
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_vector_count: usize,
    pub dimension: Option<usize>,
}

/// Nearest-neighbour index over embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Matches in descending similarity order, at most `top_k` of them.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, RetrievalError>;

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<(), RetrievalError>;

    async fn delete(&self, target: DeleteTarget) -> Result<(), RetrievalError>;

    async fn stats(&self) -> Result<StoreStats, RetrievalError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}
