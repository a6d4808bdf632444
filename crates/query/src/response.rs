use extract::{ChatProvider, ChatRequest, GenerationError, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Shown to the user when the provider call fails.
pub const PLACEHOLDER_ANSWER: &str = "Sorry, an answer could not be generated right now.";

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an assistant that answers questions using only the context you are given.";

const DEFAULT_GROUNDED_TEMPLATE: &str = "CONTEXT:
{context}

QUESTION: {question}

INSTRUCTIONS:
- Answer ONLY from the information in the context
- If the context does not contain the answer, say \"I don't have enough information about that in the provided documents\"
- Quote specific fragments when relevant
- Be clear, precise and concise

ANSWER:";

const DEFAULT_NO_CONTEXT_TEMPLATE: &str = "There is no information available to answer the question: {question}
Say plainly that the documents do not cover it and do not guess.";

/// Prompt text used for answer generation.
///
/// `{context}` and `{question}` are substituted at generation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub system_prompt: String,
    #[serde(alias = "rag_template")]
    pub grounded_template: String,
    pub no_context_template: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            grounded_template: DEFAULT_GROUNDED_TEMPLATE.to_string(),
            no_context_template: DEFAULT_NO_CONTEXT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load templates from a YAML file, keeping the built-in defaults when
    /// the file is missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Prompt file not readable, using defaults");
                return Self::default();
            }
        };

        match Self::from_yaml(&contents) {
            Ok(templates) => {
                info!(path = %path.display(), "Loaded prompt templates");
                templates
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Invalid prompt file, using defaults");
                Self::default()
            }
        }
    }

    pub fn render(&self, question: &str, context: &str) -> String {
        if context.trim().is_empty() {
            self.no_context_template.replace("{question}", question)
        } else {
            self.grounded_template
                .replace("{context}", context)
                .replace("{question}", question)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Bound on the whole provider call, retries included.
    pub timeout: Duration,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 800,
            timeout: Duration::from_secs(90),
        }
    }
}

/// Diagnostic for the response step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub success: bool,
    pub error: Option<String>,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt_length: usize,
    pub response_length: usize,
    pub has_context: bool,
    pub duration_ms: u64,
}

pub struct ResponseGenerator {
    providers: Arc<ProviderRegistry>,
    templates: PromptTemplates,
    settings: GenerationSettings,
}

impl ResponseGenerator {
    pub fn new(providers: Arc<ProviderRegistry>, templates: PromptTemplates) -> Self {
        Self {
            providers,
            templates,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// Answer `question` from `context` with the provider named `provider_name`
    /// (unknown names use the default provider). Never fails: a provider
    /// error yields [`PLACEHOLDER_ANSWER`] and `success == false`.
    pub async fn generate(&self, question: &str, context: &str, provider_name: &str) -> (String, ResponseInfo) {
        let provider = self.providers.resolve(provider_name);
        self.generate_with(provider.as_ref(), question, context).await
    }

    pub async fn generate_with(
        &self,
        provider: &dyn ChatProvider,
        question: &str,
        context: &str,
    ) -> (String, ResponseInfo) {
        let start = Instant::now();
        let prompt = self.templates.render(question, context);
        let mut info = ResponseInfo {
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            prompt_length: prompt.chars().count(),
            has_context: !context.trim().is_empty(),
            ..Default::default()
        };

        let request = ChatRequest {
            system: self.templates.system_prompt.clone(),
            user: prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let outcome = match tokio::time::timeout(self.settings.timeout, provider.complete(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GenerationError::Timeout(self.settings.timeout)),
        };
        info.duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(answer) => {
                info.success = true;
                info.response_length = answer.chars().count();
                info!(
                    provider = %info.provider,
                    response_length = info.response_length,
                    duration_ms = info.duration_ms,
                    "Response generated"
                );
                (answer, info)
            }
            Err(e) => {
                error!(provider = %info.provider, error = %e, "Response generation failed");
                info.error = Some(e.to_string());
                (PLACEHOLDER_ANSWER.to_string(), info)
            }
        }
    }
}
