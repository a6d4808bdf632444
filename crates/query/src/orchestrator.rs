use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextBuilder, ContextInfo};
use crate::error::PipelineError;
use crate::response::{ResponseGenerator, ResponseInfo};
use crate::searcher::{RetrievedChunk, SearchInfo, Searcher};

const TEXT_PREVIEW_CHARS: usize = 150;

/// Where a pipeline run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    Search,
    Context,
    Response,
    Sources,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDetail {
    pub chunk_number: usize,
    pub source_file: String,
    pub chunk_index: usize,
    pub relevance_score: f32,
    pub text_preview: String,
}

/// Provenance of the chunks that made it into the context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesInfo {
    pub success: bool,
    pub total_chunks_used: usize,
    pub unique_documents: usize,
    pub document_list: Vec<String>,
    pub sources_detail: Vec<SourceDetail>,
    pub avg_relevance: f32,
}

impl SourcesInfo {
    pub fn from_chunks(chunks: &[RetrievedChunk]) -> Self {
        let documents: BTreeSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        let sources_detail = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| SourceDetail {
                chunk_number: i + 1,
                source_file: chunk.source.clone(),
                chunk_index: chunk.chunk_index,
                relevance_score: chunk.score,
                text_preview: preview(&chunk.text, TEXT_PREVIEW_CHARS),
            })
            .collect();
        let avg_relevance = if chunks.is_empty() {
            0.0
        } else {
            chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32
        };

        Self {
            success: true,
            total_chunks_used: chunks.len(),
            unique_documents: documents.len(),
            document_list: documents.into_iter().map(str::to_string).collect(),
            sources_detail,
            avg_relevance,
        }
    }
}

/// Per-step diagnostics. A step that never ran stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSteps {
    pub search: Option<SearchInfo>,
    pub context: Option<ContextInfo>,
    pub response: Option<ResponseInfo>,
    pub sources: Option<SourcesInfo>,
}

/// Outcome of answering one question.
///
/// `final_answer` is set only when every step succeeded; otherwise `error`
/// names the first step that failed and `failed_at` records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub question: String,
    pub provider: String,
    pub steps: PipelineSteps,
    pub final_answer: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub stage: PipelineStage,
    pub failed_at: Option<PipelineStage>,
    pub duration_ms: u64,
}

impl PipelineResult {
    fn new(question: &str, provider: &str) -> Self {
        Self {
            question: question.to_string(),
            provider: provider.to_string(),
            steps: PipelineSteps::default(),
            final_answer: None,
            success: false,
            error: None,
            stage: PipelineStage::Start,
            failed_at: None,
            duration_ms: 0,
        }
    }

    /// Fill in the diagnostic of a step that was interrupted before it
    /// could report. Context and sources never yield, so only the remote
    /// steps can be caught mid-flight.
    fn record_interrupted_step(&mut self, error: &PipelineError) {
        let error = Some(error.to_string());
        match self.stage {
            PipelineStage::Search if self.steps.search.is_none() => {
                self.steps.search = Some(SearchInfo {
                    error,
                    question_length: self.question.chars().count(),
                    ..Default::default()
                });
            }
            PipelineStage::Response if self.steps.response.is_none() => {
                self.steps.response = Some(ResponseInfo {
                    error,
                    provider: self.provider.clone(),
                    ..Default::default()
                });
            }
            _ => {}
        }
    }
}

/// Runs search, context building and generation for one question.
///
/// Holds only read-only collaborators, so one instance can serve many
/// concurrent `process` calls.
pub struct Orchestrator {
    searcher: Searcher,
    context_builder: ContextBuilder,
    generator: ResponseGenerator,
}

impl Orchestrator {
    pub fn new(searcher: Searcher, context_builder: ContextBuilder, generator: ResponseGenerator) -> Self {
        Self {
            searcher,
            context_builder,
            generator,
        }
    }

    pub async fn process(&self, question: &str, provider: &str) -> PipelineResult {
        self.process_with_cancel(question, provider, &CancellationToken::new()).await
    }

    /// Like [`Orchestrator::process`], but stops at the next await point once
    /// `cancel` fires, returning the partial trace with error "cancelled".
    pub async fn process_with_cancel(
        &self,
        question: &str,
        provider: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let start = Instant::now();
        let mut result = PipelineResult::new(question, provider);
        debug!(question_length = question.chars().count(), provider, "Processing question");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            outcome = self.run(question, provider, &mut result) => outcome,
        };

        match outcome {
            Ok(answer) => {
                result.final_answer = Some(answer);
                result.success = true;
                result.stage = PipelineStage::Done;
            }
            Err(e) => {
                warn!(stage = ?result.stage, error = %e, "Question processing failed");
                if e == PipelineError::Cancelled {
                    result.record_interrupted_step(&e);
                }
                result.failed_at = Some(result.stage);
                result.stage = PipelineStage::Failed;
                result.error = Some(e.to_string());
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        if result.success {
            info!(duration_ms = result.duration_ms, "Question processed");
        }
        result
    }

    async fn run(&self, question: &str, provider: &str, result: &mut PipelineResult) -> Result<String, PipelineError> {
        result.stage = PipelineStage::Search;
        let (chunks, search_info) = self.searcher.search_question(question).await;
        let searched = search_info.success;
        result.steps.search = Some(search_info);
        if !searched {
            return Err(PipelineError::Search);
        }

        result.stage = PipelineStage::Context;
        let (context, context_info) = self.context_builder.build(&chunks);
        let used = context_info.chunks_used;
        let built = context_info.success;
        result.steps.context = Some(context_info);
        if !built {
            return Err(PipelineError::Context);
        }

        result.stage = PipelineStage::Response;
        let (answer, response_info) = self.generator.generate(question, &context, provider).await;
        let generated = response_info.success;
        result.steps.response = Some(response_info);
        if !generated {
            return Err(PipelineError::Response);
        }

        result.stage = PipelineStage::Sources;
        result.steps.sources = Some(SourcesInfo::from_chunks(&chunks[..used]));

        Ok(answer)
    }
}

/// Compact report derived from a [`PipelineResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub success: bool,
    pub error: Option<String>,
    pub steps_completed: usize,
    pub provider: String,
    pub question_length: usize,
    pub total_chunks_found: usize,
    pub chunks_used_in_context: usize,
    pub context_length: usize,
    pub response_length: usize,
    pub unique_sources: usize,
    pub avg_relevance: f32,
    pub duration_ms: u64,
}

pub fn summarize(result: &PipelineResult) -> ProcessSummary {
    let steps = &result.steps;
    let steps_completed = [
        steps.search.as_ref().map(|s| s.success),
        steps.context.as_ref().map(|s| s.success),
        steps.response.as_ref().map(|s| s.success),
        steps.sources.as_ref().map(|s| s.success),
    ]
    .into_iter()
    .filter(|done| *done == Some(true))
    .count();

    ProcessSummary {
        success: result.success,
        error: result.error.clone(),
        steps_completed,
        provider: result.provider.clone(),
        question_length: result.question.chars().count(),
        total_chunks_found: steps.search.as_ref().map_or(0, |s| s.total_found),
        chunks_used_in_context: steps.context.as_ref().map_or(0, |c| c.chunks_used),
        context_length: steps.context.as_ref().map_or(0, |c| c.total_length),
        response_length: result.final_answer.as_ref().map_or(0, |a| a.chars().count()),
        unique_sources: steps.sources.as_ref().map_or(0, |s| s.unique_documents),
        avg_relevance: steps.sources.as_ref().map_or(0.0, |s| s.avg_relevance),
        duration_ms: result.duration_ms,
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
