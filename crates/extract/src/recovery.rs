//! Recovery of a JSON object from free-form model output.
//!
//! Chat models wrap JSON in prose or markdown fences often enough that a
//! single `serde_json::from_str` is not sufficient. Each [`ParseStrategy`] is
//! tried in order until one yields an object; every attempt is recorded so
//! callers can log why earlier strategies failed.

use regex::Regex;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fenced block pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Parse the trimmed text as-is.
    Direct,
    /// Parse the interior of a ```json ... ``` or plain ``` ... ``` block.
    FencedBlock,
    /// Parse the span from the first `{` to the last `}`.
    BraceSpan,
}

impl ParseStrategy {
    pub const ORDER: [ParseStrategy; 3] = [
        ParseStrategy::Direct,
        ParseStrategy::FencedBlock,
        ParseStrategy::BraceSpan,
    ];

    fn apply(&self, raw: &str) -> ParseOutcome {
        match self {
            ParseStrategy::Direct => parse_object(raw.trim()),
            ParseStrategy::FencedBlock => {
                let mut last_failure = None;
                for captures in FENCED_BLOCK.captures_iter(raw) {
                    let interior = captures.get(1).map_or("", |m| m.as_str());
                    match parse_object(interior.trim()) {
                        ParseOutcome::Success(value) => return ParseOutcome::Success(value),
                        failure => last_failure = Some(failure),
                    }
                }
                last_failure.unwrap_or_else(|| ParseOutcome::Failure("no fenced code block".to_string()))
            }
            ParseStrategy::BraceSpan => match (raw.find('{'), raw.rfind('}')) {
                (Some(start), Some(end)) if end > start => parse_object(&raw[start..=end]),
                _ => ParseOutcome::Failure("no balanced brace span".to_string()),
            },
        }
    }
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStrategy::Direct => "direct",
            ParseStrategy::FencedBlock => "fenced_block",
            ParseStrategy::BraceSpan => "brace_span",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Success(Map<String, Value>),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseAttempt {
    pub strategy: ParseStrategy,
    /// `None` when the attempt succeeded.
    pub failure: Option<String>,
}

/// The result of running every strategy until one succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub attempts: Vec<ParseAttempt>,
    pub object: Option<Map<String, Value>>,
}

impl Recovery {
    pub fn succeeded_with(&self) -> Option<ParseStrategy> {
        self.object.as_ref()?;
        self.attempts.last().map(|a| a.strategy)
    }

    /// The recovered object, or the canonical empty object.
    pub fn into_value(self) -> Value {
        match self.object {
            Some(object) => Value::Object(object),
            None => empty_object(),
        }
    }
}

/// Run the strategies in order, stopping at the first success.
pub fn recover(raw: &str) -> Recovery {
    let mut attempts = Vec::with_capacity(ParseStrategy::ORDER.len());

    for strategy in ParseStrategy::ORDER {
        match strategy.apply(raw) {
            ParseOutcome::Success(object) => {
                attempts.push(ParseAttempt { strategy, failure: None });
                return Recovery { attempts, object: Some(object) };
            }
            ParseOutcome::Failure(reason) => {
                attempts.push(ParseAttempt { strategy, failure: Some(reason) });
            }
        }
    }

    Recovery { attempts, object: None }
}

/// Recover a JSON object from model output. Never fails: unrecoverable
/// input yields `{"entities": [], "relations": []}`.
pub fn extract_json(raw: &str) -> Value {
    let recovery = recover(raw);
    match recovery.succeeded_with() {
        Some(strategy) => tracing::debug!(%strategy, "Recovered JSON from model output"),
        None => {
            let reasons: Vec<String> = recovery
                .attempts
                .iter()
                .map(|a| format!("{}: {}", a.strategy, a.failure.as_deref().unwrap_or("ok")))
                .collect();
            tracing::warn!(
                attempts = %reasons.join("; "),
                raw_len = raw.len(),
                "No JSON object found in model output"
            );
        }
    }
    recovery.into_value()
}

pub fn empty_object() -> Value {
    json!({ "entities": [], "relations": [] })
}

fn parse_object(candidate: &str) -> ParseOutcome {
    if candidate.is_empty() {
        return ParseOutcome::Failure("empty input".to_string());
    }
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => ParseOutcome::Success(object),
        Ok(other) => ParseOutcome::Failure(format!("expected an object, found {}", json_kind(&other))),
        Err(e) => ParseOutcome::Failure(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
