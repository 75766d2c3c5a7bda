//! HTTP provider speaking the OpenAI chat-completions surface.
//!
//! Ollama, vLLM, and most hosted gateways expose the same endpoint shape,
//! so one provider covers the configured `llm.provider` choices; the
//! difference is the base URL and whether an API key is present.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use weaver_core::LlmError;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
}

pub struct HttpProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// One raw completion attempt. Retry policy lives in the client, not
    /// here; this maps transport and status failures onto the error
    /// taxonomy.
    pub async fn complete_once(
        &self,
        prompt: &str,
        model: Option<&str>,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        let body = json!({
            "model": model.unwrap_or(&self.config.default_model),
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let mut request = self.client.post(&url).json(&body).timeout(timeout);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                LlmError::Transient(format!("request failed: {e}"))
            } else {
                LlmError::Permanent(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LlmError::Transient(format!("provider returned {status}")));
        }
        if status.is_client_error() {
            return Err(LlmError::Permanent(format!("provider returned {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("malformed provider response: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Transient("provider returned no choices".into()))?;

        debug!(chars = text.len(), "llm completion received");
        Ok(text)
    }
}
