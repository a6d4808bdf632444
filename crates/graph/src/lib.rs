pub mod assembler;
pub mod graph;

pub use assembler::GraphAssembler;
pub use graph::{EntityNode, ExportEdge, ExportNode, GraphExport, GraphSummary, KnowledgeGraph, RelationEdge};
