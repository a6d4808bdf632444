pub mod context;
pub mod documents;
pub mod error;
pub mod orchestrator;
pub mod response;
pub mod searcher;

#[cfg(test)]
mod testing;

pub use context::{ContextBuilder, ContextInfo};
pub use documents::DocumentGraphBuilder;
pub use error::{ContextError, PipelineError};
pub use orchestrator::{
    Orchestrator, PipelineResult, PipelineStage, PipelineSteps, ProcessSummary, SourceDetail, SourcesInfo, summarize,
};
pub use response::{GenerationSettings, PromptTemplates, ResponseGenerator, ResponseInfo};
pub use searcher::{RetrievedChunk, SearchInfo, Searcher};
