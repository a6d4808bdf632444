use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::RetrievalError;
use crate::vector_store::{DeleteTarget, Metadata, MetadataFilter, StoreStats, VectorMatch, VectorStore};

/// Payload key holding the caller's string id; Qdrant itself only accepts
/// integer or UUID point ids.
pub const POINT_KEY: &str = "point_key";

/// Qdrant collection accessed over its REST API.
pub struct QdrantStore {
    base_url: String,
    collection_name: String,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: Metadata,
}

impl QdrantStore {
    pub fn new(base_url: String, collection_name: String, dimension: usize, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_name,
            dimension,
            client,
        }
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection_name, suffix)
    }

    /// Create the collection with cosine distance unless it already exists.
    pub async fn init_collection(&self) -> Result<(), RetrievalError> {
        let response = self.client.get(self.collection_url("")).send().await?;
        if response.status().is_success() {
            debug!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        let create_req = CreateCollection {
            vectors: VectorParams { size: self.dimension, distance: "Cosine" },
        };
        let response = self.client.put(self.collection_url("")).json(&create_req).send().await?;
        expect_success(response).await?;

        info!(collection = %self.collection_name, dimension = self.dimension, "Created collection");
        Ok(())
    }

    async fn post(&self, suffix: &str, body: &Value) -> Result<Value, RetrievalError> {
        let response = self.client.post(self.collection_url(suffix)).json(body).send().await?;
        let response = expect_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| RetrievalError::MalformedResponse(e.to_string()))
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    Err(RetrievalError::Status { status: status.as_u16(), body })
}

/// Stable mapping from a string id onto a Qdrant integer point id.
pub fn point_id(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn filter_json(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .equals
        .iter()
        .map(|(key, value)| json!({"key": key, "match": {"value": value}}))
        .collect();
    json!({ "must": must })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true
        });
        if let Some(filter) = filter {
            body["filter"] = filter_json(filter);
        }

        let result = self.post("/points/search", &body).await?;
        let points = result["result"]
            .as_array()
            .ok_or_else(|| RetrievalError::MalformedResponse("missing result array".to_string()))?;

        let mut matches = Vec::with_capacity(points.len());
        for point in points {
            let score = point["score"].as_f64().unwrap_or(0.0) as f32;
            let mut metadata = point["payload"].as_object().cloned().unwrap_or_default();
            let id = match metadata.remove(POINT_KEY) {
                Some(Value::String(key)) => key,
                _ => point["id"].to_string(),
            };
            matches.push(VectorMatch { id, score, metadata });
        }

        Ok(matches)
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, mut metadata: Metadata) -> Result<(), RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch { expected: self.dimension, actual: vector.len() });
        }
        metadata.insert(POINT_KEY.to_string(), Value::String(id.to_string()));

        let body = json!({ "points": [Point { id: point_id(id), vector, payload: metadata }] });
        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&body)
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn delete(&self, target: DeleteTarget) -> Result<(), RetrievalError> {
        let body = match target {
            DeleteTarget::Id(id) => json!({ "points": [point_id(&id)] }),
            DeleteTarget::Filter(filter) => json!({ "filter": filter_json(&filter) }),
            DeleteTarget::All => json!({ "filter": { "must": [] } }),
        };
        self.post("/points/delete?wait=true", &body).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, RetrievalError> {
        let response = self.client.get(self.collection_url("")).send().await?;
        let info: Value = expect_success(response)
            .await?
            .json()
            .await
            .map_err(|e| RetrievalError::MalformedResponse(e.to_string()))?;

        let total = info["result"]["points_count"]
            .as_u64()
            .or_else(|| info["result"]["vectors_count"].as_u64())
            .unwrap_or(0);

        Ok(StoreStats {
            total_vector_count: total as usize,
            dimension: Some(self.dimension),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_point_id_is_stable() {
        assert_eq!(point_id("chunk-1"), point_id("chunk-1"));
        assert_ne!(point_id("chunk-1"), point_id("chunk-2"));
    }

    #[tokio::test]
    async fn test_query_restores_string_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .and(body_partial_json(json!({
                "limit": 2,
                "filter": {"must": [{"key": "document_id", "match": {"value": "d1"}}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": 11, "score": 0.9, "payload": {"point_key": "c1", "chunk_text": "alpha"}},
                    {"id": 12, "score": 0.4, "payload": {"chunk_text": "beta"}}
                ],
                "status": "ok"
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "docs".to_string(), 3, 5);
        let filter = MetadataFilter::eq("document_id", "d1");
        let matches = store.query(&[0.1, 0.2, 0.3], 2, Some(&filter)).await.unwrap();

        assert_eq!(matches[0].id, "c1");
        assert_eq!(matches[0].metadata["chunk_text"], "alpha");
        assert!(matches[0].metadata.get(POINT_KEY).is_none());
        assert_eq!(matches[1].id, "12");
    }

    #[tokio::test]
    async fn test_stats_reads_points_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"points_count": 42, "status": "green"}
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "docs".to_string(), 3, 5);
        assert_eq!(store.stats().await.unwrap().total_vector_count, 42);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retrieval_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let store = QdrantStore::new(server.uri(), "docs".to_string(), 3, 5);
        let err = store.query(&[0.1, 0.2, 0.3], 2, None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Status { status: 503, .. }));
    }
}
