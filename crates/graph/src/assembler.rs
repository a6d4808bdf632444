use extract::ExtractionResult;
use tracing::debug;

use crate::graph::KnowledgeGraph;

/// Merges per-chunk extraction batches into one graph.
///
/// Chunks are extracted independently, so two batches can both emit an id
/// like "e1". Every id in batch `i` is rewritten to `c{i}_{id}` before the
/// merge. No entity resolution is attempted across batches: the same name in
/// two chunks yields two nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphAssembler;

impl GraphAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Merge batches in the order given. Batch order must match chunk order
    /// for the resulting ids to be reproducible.
    pub fn merge(&self, batches: Vec<ExtractionResult>) -> KnowledgeGraph {
        let batch_count = batches.len();
        let merged = self.merge_results(batches);
        let graph = KnowledgeGraph::from_extraction(merged);

        debug!(
            batches = batch_count,
            entities = graph.entity_count(),
            relations = graph.relation_count(),
            "Assembled knowledge graph"
        );
        graph
    }

    /// The flat, re-validated result behind [`GraphAssembler::merge`].
    pub fn merge_results(&self, batches: Vec<ExtractionResult>) -> ExtractionResult {
        let mut merged = ExtractionResult::empty();

        for (i, batch) in batches.into_iter().enumerate() {
            let prefix = format!("c{i}_");
            merged.entities.extend(batch.entities.into_iter().map(|mut entity| {
                entity.id.insert_str(0, &prefix);
                entity
            }));
            merged.relations.extend(batch.relations.into_iter().map(|mut relation| {
                relation.source_id.insert_str(0, &prefix);
                relation.target_id.insert_str(0, &prefix);
                relation
            }));
        }

        extract::revalidate(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::Relation;
    use serde_json::json;

    fn batch(value: serde_json::Value) -> ExtractionResult {
        extract::validate(&value)
    }

    #[test]
    fn test_colliding_ids_stay_distinct() {
        let batches = vec![
            batch(json!({"entities": [{"id": "e1", "type": "Person", "text": "Ana"}]})),
            batch(json!({"entities": [{"id": "e1", "type": "Person", "text": "Ana"}]})),
        ];

        let graph = GraphAssembler::new().merge(batches);

        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.entity("c0_e1").map(|n| n.text.as_str()), Some("Ana"));
        assert_eq!(graph.entity("c1_e1").map(|n| n.text.as_str()), Some("Ana"));
    }

    #[test]
    fn test_relations_follow_their_batch() {
        let batches = vec![
            batch(json!({
                "entities": [{"id": "e1"}, {"id": "e2"}],
                "relations": [{"source_id": "e1", "target_id": "e2", "type": "knows"}]
            })),
            batch(json!({
                "entities": [{"id": "e1"}, {"id": "e2"}],
                "relations": [{"source_id": "e2", "target_id": "e1", "type": "knows"}]
            })),
        ];

        let merged = GraphAssembler::new().merge_results(batches);

        let endpoints: Vec<(&str, &str)> = merged
            .relations
            .iter()
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();
        assert_eq!(endpoints, vec![("c0_e1", "c0_e2"), ("c1_e2", "c1_e1")]);
    }

    #[test]
    fn test_cross_batch_edges_are_dropped() {
        let first = batch(json!({"entities": [{"id": "e1"}]}));
        let mut second = batch(json!({"entities": [{"id": "e2"}]}));
        // points at an entity that only exists in the first batch
        second.relations.push(Relation {
            source_id: "e2".to_string(),
            target_id: "e1".to_string(),
            relation_type: "knows".to_string(),
            text: "knows".to_string(),
        });

        let graph = GraphAssembler::new().merge(vec![first, second]);

        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.relation_count(), 0);
    }

    #[test]
    fn test_no_batches() {
        let graph = GraphAssembler::new().merge(Vec::new());
        assert!(graph.is_empty());
        assert_eq!(graph.relation_count(), 0);
    }
}
