use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::error::ContextError;
use crate::searcher::RetrievedChunk;

pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 4000;
const PREVIEW_CHARS: usize = 200;
const SEPARATOR: &str = "\n";

/// Diagnostic for the context step. Lengths are in characters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub success: bool,
    pub error: Option<String>,
    pub chunks_provided: usize,
    pub chunks_used: usize,
    pub chunks_excluded: usize,
    pub total_length: usize,
    pub max_allowed_length: usize,
    pub avg_relevance_score: f32,
    pub unique_sources: usize,
    pub context_preview: String,
}

/// Packs ranked chunks into a bounded context string.
///
/// Chunks are taken in the order given until the next one would overflow
/// the budget; that chunk and everything after it are left out. A chunk is
/// never cut. The budget covers headers and the separators between chunks,
/// so the returned context is never longer than `max_context_length`.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_context_length: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_LENGTH)
    }
}

impl ContextBuilder {
    pub fn new(max_context_length: usize) -> Self {
        Self { max_context_length }
    }

    pub fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    pub fn build(&self, chunks: &[RetrievedChunk]) -> (String, ContextInfo) {
        let mut info = ContextInfo {
            chunks_provided: chunks.len(),
            max_allowed_length: self.max_context_length,
            ..Default::default()
        };

        if chunks.is_empty() {
            info.error = Some(ContextError::NoChunks.to_string());
            return (String::new(), info);
        }

        let mut context = String::new();
        let mut total_length = 0;
        let mut used = 0;

        for (i, chunk) in chunks.iter().enumerate() {
            let formatted = format_chunk(chunk, i + 1);
            let separator = if used == 0 { "" } else { SEPARATOR };
            let cost = separator.len() + formatted.chars().count();

            if total_length + cost > self.max_context_length {
                warn!(chunk = i + 1, budget = self.max_context_length, "Context length limit reached");
                break;
            }

            context.push_str(separator);
            context.push_str(&formatted);
            total_length += cost;
            used += 1;
        }

        info.success = true;
        info.chunks_used = used;
        info.chunks_excluded = chunks.len() - used;
        info.total_length = total_length;

        // An empty context is still a valid one; generation falls back to
        // the no-context prompt.
        if used == 0 {
            return (String::new(), info);
        }

        let kept = &chunks[..used];
        info.avg_relevance_score = kept.iter().map(|c| c.score).sum::<f32>() / used as f32;
        info.unique_sources = kept.iter().map(|c| c.source.as_str()).collect::<HashSet<_>>().len();
        info.context_preview = preview(&context, PREVIEW_CHARS);

        info!(chunks_used = used, total_length, "Context built");
        (context, info)
    }
}

/// Header line with position, relevance and source, then the chunk text.
pub fn format_chunk(chunk: &RetrievedChunk, position: usize) -> String {
    format!(
        "[Chunk {} - Relevance: {:.3} - Source: {}]\n{}\n",
        position, chunk.score, chunk.source, chunk.text
    )
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
