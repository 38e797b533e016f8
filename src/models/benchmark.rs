// Benchmark domain types shared by the orchestrator, stores and routes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::openai::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::error::BenchError;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// A single prompt fanned out to several models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRequest {
    pub prompt: String,
    pub models: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl BenchmarkRequest {
    pub fn new(prompt: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            models,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Reject requests that must never reach the network
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.prompt.trim().is_empty() {
            return Err(BenchError::Validation(
                "Prompt and at least one model are required".to_string(),
            ));
        }
        if self.models.is_empty() {
            return Err(BenchError::Validation(
                "Prompt and at least one model are required".to_string(),
            ));
        }
        if let Some(position) = self.models.iter().position(|m| m.trim().is_empty()) {
            return Err(BenchError::Validation(format!(
                "Model identifier at position {} is empty",
                position
            )));
        }
        if self.max_tokens == 0 {
            return Err(BenchError::Validation(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if !self.temperature.is_finite() {
            return Err(BenchError::Validation(
                "temperature must be a finite number".to_string(),
            ));
        }
        Ok(())
    }

    /// Gateway request body for one model
    pub fn to_chat_request(&self, model: &str, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(self.prompt.clone())],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }
}

/// Terminal result for one model in a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOutcome {
    pub model: String,
    pub response_time: u64,
    pub response: Option<ChatCompletionResponse>,
    pub error: Option<String>,
}

impl ModelOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Status text in the convention consumers of stored results parse
    pub fn status(&self) -> String {
        result_status(self.error.as_deref())
    }
}

/// `"completed"` or `"error: <message>"`
pub fn result_status(error: Option<&str>) -> String {
    match error {
        None => "completed".to_string(),
        Some(message) => format!("error: {}", message),
    }
}

/// Joined result of a batch run.
///
/// `results` is in completion order. Timestamps are milliseconds since the
/// Unix epoch; `total_time` is measured on a monotonic clock and
/// `end_time = start_time + total_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkComparison {
    pub prompt: String,
    pub results: Vec<ModelOutcome>,
    pub start_time: i64,
    pub end_time: i64,
    pub total_time: u64,
}

/// Events emitted while streaming models concurrently.
///
/// Per model: one `Start`, then any number of `Chunk`/`Metrics`, then exactly
/// one of `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        model: String,
    },
    #[serde(rename_all = "camelCase")]
    Chunk {
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Metrics {
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        latency: Option<u64>,
        tokens_per_second: f64,
        total_tokens: u64,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        model: String,
        total_tokens: u64,
        response_time: u64,
    },
    Error {
        model: String,
        error: String,
    },
}

impl StreamEvent {
    pub fn model(&self) -> &str {
        match self {
            StreamEvent::Start { model }
            | StreamEvent::Chunk { model, .. }
            | StreamEvent::Metrics { model, .. }
            | StreamEvent::Complete { model, .. }
            | StreamEvent::Error { model, .. } => model,
        }
    }

    /// Tag name, also used as the SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Metrics { .. } => "metrics",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Complete { .. } | StreamEvent::Error { .. }
        )
    }
}

/// API key as handed out by a credential store
#[derive(Debug, Clone)]
pub struct Credential {
    pub provider: String,
    pub value: String,
    pub obtained_at: DateTime<Utc>,
}

/// One per-model outcome as forwarded to a result sink
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub response_time_ms: u64,
    pub response_text: String,
    pub status: String,
}

/// A persisted result as read back from history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: i64,
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub response_time: u64,
    pub response_text: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
