use extract::Extractor;
use graph::{GraphAssembler, KnowledgeGraph};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Builds a knowledge graph from a chunked document.
///
/// Only the leading chunks allowed by the extractor's `max_chunks` are
/// sent to the model. Batches reach the assembler in chunk order, so the
/// `c{i}_` ids are the same on every run.
pub struct DocumentGraphBuilder {
    extractor: Arc<Extractor>,
    assembler: GraphAssembler,
}

impl DocumentGraphBuilder {
    pub fn new(extractor: Arc<Extractor>) -> Self {
        Self {
            extractor,
            assembler: GraphAssembler::new(),
        }
    }

    pub async fn build(&self, chunks: &[ingest::Chunk], provider: &str) -> KnowledgeGraph {
        let start = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batches = self.extractor.extract_chunks(&texts, provider).await;
        let graph = self.assembler.merge(batches);

        info!(
            chunks = chunks.len(),
            entities = graph.entity_count(),
            relations = graph.relation_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Built document graph"
        );
        graph
    }
}
