//! The narrow contract the engine requires from an LLM provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Shape the caller expects the completion in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// A single JSON value, parsed strictly.
    Json,
    /// A JSON array of strings, parsed strictly.
    List,
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub response_format: ResponseFormat,
    pub timeout: Duration,
    /// Overrides the client's default model when set.
    pub model: Option<String>,
    /// Fail immediately instead of waiting when the rate limiter is empty.
    pub fail_fast: bool,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
            response_format: ResponseFormat::Text,
            timeout: Duration::from_secs(28),
            model: None,
            fail_fast: false,
        }
    }
}

impl LlmOptions {
    pub fn json() -> Self {
        Self {
            response_format: ResponseFormat::Json,
            ..Default::default()
        }
    }

    pub fn list() -> Self {
        Self {
            response_format: ResponseFormat::List,
            ..Default::default()
        }
    }
}

/// A parsed completion, matching the requested [`ResponseFormat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmOutput {
    Text(String),
    Json(serde_json::Value),
    List(Vec<String>),
}

impl LlmOutput {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            LlmOutput::Json(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// Network failures, timeouts, 429 and 5xx responses. Retried.
    #[error("transient llm failure: {0}")]
    Transient(String),
    /// Non-retryable provider errors (4xx other than 429, auth).
    #[error("permanent llm failure: {0}")]
    Permanent(String),
    /// The circuit breaker is open; the provider was not contacted.
    #[error("llm circuit breaker is open")]
    CircuitOpen,
    /// The response did not parse as the requested format.
    #[error("llm response parse failure: {message}")]
    Parse { message: String, raw: String },
    /// The rate limiter was empty and the caller asked to fail fast.
    #[error("llm rate limit exceeded")]
    RateLimited,
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Transient(_) | LlmError::RateLimited => ErrorKind::LlmTransient,
            LlmError::Permanent(_) => ErrorKind::LlmPermanent,
            LlmError::CircuitOpen => ErrorKind::LlmCircuitOpen,
            LlmError::Parse { .. } => ErrorKind::LlmParseError,
        }
    }
}

/// Retried, rate-limited request/response to an LLM.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: LlmOptions) -> Result<LlmOutput, LlmError>;
}
