pub mod llm;
pub mod prompt;
pub mod recovery;
pub mod retry;
pub mod schema;
pub mod validate;

pub use llm::{
    AnthropicChat, ChatProvider, ChatRequest, GenerationError, OllamaChat, OpenAiChat,
    ProviderConfig, ProviderRegistry,
};
pub use recovery::{ParseStrategy, Recovery, extract_json};
pub use retry::RetryPolicy;
pub use schema::{Entity, EntityType, ExtractionResult, Relation};
pub use validate::{ValidationReport, revalidate, validate};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Input is cut to this many characters before prompting.
    pub max_input_chars: usize,
    /// Only this many leading chunks of a document are sent for extraction.
    pub max_chunks: usize,
    /// Chunks extracted at the same time.
    pub concurrency: usize,
    pub language: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 4000,
            max_chunks: 5,
            concurrency: 3,
            language: "English".to_string(),
            temperature: 0.0,
            max_tokens: 1000,
        }
    }
}

/// Turns text into validated entities and relations.
///
/// Extraction never fails: provider errors and unparseable output both
/// degrade to an empty result, with the cause logged.
pub struct Extractor {
    providers: Arc<ProviderRegistry>,
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(providers: Arc<ProviderRegistry>, config: ExtractionConfig) -> Self {
        Self { providers, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract from a chunk of text with the provider registered under `provider_name`.
    pub async fn extract_entities_relations(&self, text: &str, provider_name: &str) -> ExtractionResult {
        let provider = self.providers.resolve(provider_name);
        self.extract_with(provider.as_ref(), text).await
    }

    pub async fn extract_with(&self, provider: &dyn ChatProvider, text: &str) -> ExtractionResult {
        let input = truncate_chars(text, self.config.max_input_chars);
        if input.trim().is_empty() {
            debug!("Skipping extraction of empty text");
            return ExtractionResult::empty();
        }

        let request = ChatRequest {
            system: prompt::EXTRACTION_SYSTEM_PROMPT.to_string(),
            user: prompt::build_extraction_prompt(input, &self.config.language),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let start = Instant::now();
        let raw = match provider.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Entity extraction call failed");
                return ExtractionResult::empty();
            }
        };

        let (result, report) = validate::validate_with_report(&extract_json(&raw));
        info!(
            provider = provider.name(),
            entities = result.entities.len(),
            relations = result.relations.len(),
            entities_dropped = report.entities_dropped,
            relations_dropped = report.relations_dropped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Extracted entities and relations"
        );
        result
    }

    /// Extract from the leading `max_chunks` chunks of a document.
    ///
    /// Calls run through a bounded pool, but results are returned in chunk
    /// order so downstream id prefixes are reproducible.
    pub async fn extract_chunks(&self, chunks: &[String], provider_name: &str) -> Vec<ExtractionResult> {
        let provider = self.providers.resolve(provider_name);
        let selected = &chunks[..chunks.len().min(self.config.max_chunks)];
        if selected.len() < chunks.len() {
            debug!(
                total = chunks.len(),
                selected = selected.len(),
                "Capping chunks sent for extraction"
            );
        }

        stream::iter((0..selected.len()).map(|i| {
            let chunk = selected[i].as_str();
            let provider = provider.clone();
            async move { self.extract_with(provider.as_ref(), chunk).await }
        }))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with a fixed string and remembers the prompts it saw.
    struct Scripted {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: Err(()), prompts: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ChatProvider for Scripted {
        async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(request.user.clone());
            self.reply
                .clone()
                .map_err(|_| GenerationError::Status { status: 500, body: "down".to_string() })
        }
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-1"
        }
    }

    fn extractor(provider: Arc<Scripted>, config: ExtractionConfig) -> Extractor {
        Extractor::new(Arc::new(ProviderRegistry::new(provider)), config)
    }

    #[tokio::test]
    async fn test_fenced_reply_with_preamble() {
        let provider = Scripted::ok(
            "Here is the JSON:\n```json\n{\"entities\":[{\"id\":\"e1\",\"type\":\"Person\",\"text\":\"Ana\"}],\"relations\":[]}\n```",
        );
        let extractor = extractor(provider, ExtractionConfig::default());

        let result = extractor.extract_entities_relations("Ana is here.", "scripted").await;

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].id, "e1");
        assert_eq!(result.entities[0].entity_type, "Person");
        assert!(result.relations.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_empty() {
        let extractor = extractor(Scripted::failing(), ExtractionConfig::default());
        let result = extractor.extract_entities_relations("Some text", "anything").await;
        assert_eq!(result, ExtractionResult::empty());
    }

    #[tokio::test]
    async fn test_garbage_reply_degrades_to_empty() {
        let extractor = extractor(Scripted::ok("I could not find anything."), ExtractionConfig::default());
        let result = extractor.extract_entities_relations("Some text", "scripted").await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_input_is_truncated() {
        let provider = Scripted::ok("{}");
        let config = ExtractionConfig { max_input_chars: 10, ..Default::default() };
        let extractor = extractor(provider.clone(), config);

        extractor.extract_entities_relations(&"ñ".repeat(50), "scripted").await;

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains(&format!("\"\"\"{}\"\"\"", "ñ".repeat(10))));
        assert!(!prompts[0].contains(&"ñ".repeat(11)));
    }

    #[tokio::test]
    async fn test_extract_chunks_caps_and_keeps_order() {
        let provider = Scripted::ok("{\"entities\": [{\"id\": \"e1\"}]}");
        let config = ExtractionConfig { max_chunks: 2, concurrency: 2, ..Default::default() };
        let extractor = extractor(provider.clone(), config);
        let chunks: Vec<String> = (0..4).map(|i| format!("chunk number {i}")).collect();

        let results = extractor.extract_chunks(&chunks, "scripted").await;

        assert_eq!(results.len(), 2);
        assert_eq!(provider.prompts.lock().unwrap().len(), 2);
        assert!(results.iter().all(|r| r.entities[0].id == "e1"));
    }

    #[tokio::test]
    async fn test_blank_text_skips_provider() {
        let provider = Scripted::ok("{}");
        let extractor = extractor(provider.clone(), ExtractionConfig::default());
        assert!(extractor.extract_entities_relations("   ", "scripted").await.is_empty());
        assert!(provider.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
