use thiserror::Error;

/// Degenerate input to context building.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("No chunks provided")]
    NoChunks,
}

/// The first step that failed in a pipeline run.
///
/// The display text is what end users see; the full cause stays in the
/// step diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("semantic search failed")]
    Search,

    #[error("context building failed")]
    Context,

    #[error("response generation failed")]
    Response,

    #[error("cancelled")]
    Cancelled,
}
