use extract::{Entity, EntityType, ExtractionResult, Relation};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityNode {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEdge {
    #[serde(rename = "type")]
    pub relation_type: String,
    pub text: String,
}

/// Counts computed once when the graph is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub entity_count: usize,
    pub relation_count: usize,
    pub entity_types: BTreeMap<String, usize>,
    /// Entity labels grouped by [`EntityType`] class.
    pub entity_kinds: BTreeMap<EntityType, usize>,
    pub relation_types: BTreeMap<String, usize>,
}

/// Node element for graph renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub class: String,
}

/// Edge element for graph renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

/// Directed graph of entities (nodes) and relations (edges).
///
/// Every edge joins two nodes of the graph and entity ids are unique. The
/// value is owned by whoever built it.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<EntityNode, RelationEdge>,
    index: HashMap<String, NodeIndex>,
    summary: GraphSummary,
}

impl KnowledgeGraph {
    /// Build from an extraction result, re-validating it first so that
    /// duplicate ids and dangling relations never reach the graph.
    pub fn from_extraction(result: ExtractionResult) -> Self {
        let result = extract::revalidate(result);
        let mut graph = DiGraph::with_capacity(result.entities.len(), result.relations.len());
        let mut index = HashMap::with_capacity(result.entities.len());
        let mut summary = GraphSummary::default();

        for entity in result.entities {
            *summary.entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
            *summary.entity_kinds.entry(entity.kind()).or_insert(0) += 1;
            let id = entity.id.clone();
            let node = graph.add_node(EntityNode {
                id: entity.id,
                entity_type: entity.entity_type,
                text: entity.text,
            });
            index.insert(id, node);
        }

        for relation in result.relations {
            let (Some(&source), Some(&target)) = (index.get(&relation.source_id), index.get(&relation.target_id))
            else {
                continue;
            };
            *summary.relation_types.entry(relation.relation_type.clone()).or_insert(0) += 1;
            graph.add_edge(
                source,
                target,
                RelationEdge {
                    relation_type: relation.relation_type,
                    text: relation.text,
                },
            );
        }

        summary.entity_count = graph.node_count();
        summary.relation_count = graph.edge_count();

        Self { graph, index, summary }
    }

    pub fn summary(&self) -> &GraphSummary {
        &self.summary
    }

    pub fn entity_count(&self) -> usize {
        self.summary.entity_count
    }

    pub fn relation_count(&self) -> usize {
        self.summary.relation_count
    }

    pub fn is_empty(&self) -> bool {
        self.summary.entity_count == 0
    }

    pub fn entity(&self, id: &str) -> Option<&EntityNode> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    /// Edges leaving `id`, each with the node it points at, in insertion order.
    pub fn outgoing(&self, id: &str) -> Vec<(&RelationEdge, &EntityNode)> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(node, Direction::Outgoing).collect();
        // petgraph walks adjacency lists newest first
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| (edge.weight(), &self.graph[edge.target()]))
            .collect()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityNode> {
        self.graph.node_weights()
    }

    /// Histogram over [`EntityType`] classes rather than raw labels.
    pub fn kind_histogram(&self) -> &BTreeMap<EntityType, usize> {
        &self.summary.entity_kinds
    }

    pub fn to_export(&self) -> GraphExport {
        let nodes = self
            .graph
            .node_weights()
            .map(|node| ExportNode {
                id: node.id.clone(),
                label: node.text.clone(),
                entity_type: node.entity_type.clone(),
                class: format!("node-{}", node.entity_type.to_lowercase()),
            })
            .collect();

        let edges = self
            .graph
            .edge_references()
            .map(|edge| {
                let source = &self.graph[edge.source()].id;
                let target = &self.graph[edge.target()].id;
                ExportEdge {
                    id: format!("{source}-{target}-{}", edge.id().index()),
                    source: source.clone(),
                    target: target.clone(),
                    label: edge.weight().relation_type.clone(),
                    text: edge.weight().text.clone(),
                }
            })
            .collect();

        GraphExport { nodes, edges }
    }

    pub fn to_extraction(&self) -> ExtractionResult {
        let entities = self
            .graph
            .node_weights()
            .map(|node| Entity {
                id: node.id.clone(),
                entity_type: node.entity_type.clone(),
                text: node.text.clone(),
            })
            .collect();

        let relations = self
            .graph
            .edge_references()
            .map(|edge| Relation {
                source_id: self.graph[edge.source()].id.clone(),
                target_id: self.graph[edge.target()].id.clone(),
                relation_type: edge.weight().relation_type.clone(),
                text: edge.weight().text.clone(),
            })
            .collect();

        ExtractionResult { entities, relations }
    }
}
