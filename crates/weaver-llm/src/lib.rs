//! LLM client: retried, rate-limited request/response to a provider.
//!
//! The public surface is the `LlmClient` trait from `weaver-core`;
//! [`HttpLlmClient`] is the production implementation, wiring together:
//!
//! - a token-bucket rate limiter (default 50 req/min),
//! - bounded retries with exponential backoff and jitter on transient
//!   failures (network, 429, 5xx),
//! - a process-wide circuit breaker that fails fast while the provider is
//!   down,
//! - strict parsing of `json`/`list` response formats.
//!
//! [`MockLlmClient`] (behind the `test-utils` feature) gives dependent
//! crates a scripted double with call accounting.

mod breaker;
mod parse;
mod provider;
mod rate_limit;

pub use breaker::{BreakerState, CircuitBreaker};
pub use parse::parse_output;
pub use provider::{HttpProvider, ProviderConfig};
pub use rate_limit::TokenBucket;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use weaver_core::{LlmClient, LlmError, LlmOptions, LlmOutput};

/// Everything needed to build an [`HttpLlmClient`].
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub provider: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub default_model: String,
    pub rate_limit_per_minute: u32,
    pub max_retries: u32,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl LlmClientConfig {
    fn resolved_url(&self) -> String {
        if let Some(url) = &self.api_url {
            return url.clone();
        }
        match self.provider.as_str() {
            "ollama" => "http://localhost:11434/v1".to_string(),
            _ => "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Production client. One instance per process; the rate limiter and the
/// breaker state are global by construction.
pub struct HttpLlmClient {
    provider: HttpProvider,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn new(config: LlmClientConfig) -> Self {
        let provider = HttpProvider::new(ProviderConfig {
            api_url: config.resolved_url(),
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
        });
        Self {
            provider,
            bucket: TokenBucket::per_minute(config.rate_limit_per_minute),
            breaker: CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown),
            max_retries: config.max_retries,
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn backoff(attempt: u32) -> Duration {
        let base = Duration::from_millis(200).saturating_mul(1 << attempt.min(5));
        let jitter = base.mul_f64(rand::random::<f64>() * 0.5);
        (base + jitter).min(Duration::from_secs(5))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str, options: LlmOptions) -> Result<LlmOutput, LlmError> {
        if !self.breaker.admit() {
            return Err(LlmError::CircuitOpen);
        }
        if options.fail_fast {
            if self.bucket.try_acquire().is_err() {
                return Err(LlmError::RateLimited);
            }
        } else {
            self.bucket.acquire().await;
        }

        let mut attempt = 0;
        let outcome = loop {
            let result = self
                .provider
                .complete_once(
                    prompt,
                    options.model.as_deref(),
                    options.max_tokens,
                    options.temperature,
                    options.timeout,
                )
                .await;
            match result {
                Ok(text) => break Ok(text),
                Err(LlmError::Transient(reason)) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Self::backoff(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %reason, "transient llm failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(text) => {
                self.breaker.on_success();
                debug!(attempts = attempt + 1, "llm call succeeded");
                // A parse failure is the model's fault, not the provider's;
                // it does not count toward the breaker.
                parse_output(&text, options.response_format)
            }
            Err(e) => {
                self.breaker.on_failure();
                Err(e)
            }
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Scripted LLM double for engine and rule tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use weaver_core::{LlmClient, LlmError, LlmOptions, LlmOutput};

    #[derive(Default)]
    pub struct MockLlmClient {
        responses: Mutex<VecDeque<Result<LlmOutput, String>>>,
        calls: AtomicUsize,
    }

    impl MockLlmClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_text(&self, text: impl Into<String>) {
            self.responses
                .lock()
                .push_back(Ok(LlmOutput::Text(text.into())));
        }

        pub fn push_json(&self, value: serde_json::Value) {
            self.responses.lock().push_back(Ok(LlmOutput::Json(value)));
        }

        pub fn push_list(&self, items: Vec<String>) {
            self.responses.lock().push_back(Ok(LlmOutput::List(items)));
        }

        pub fn push_failure(&self, message: impl Into<String>) {
            self.responses.lock().push_back(Err(message.into()));
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(
            &self,
            _prompt: &str,
            _options: LlmOptions,
        ) -> Result<LlmOutput, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().pop_front() {
                Some(Ok(output)) => Ok(output),
                Some(Err(message)) => Err(LlmError::Permanent(message)),
                None => Err(LlmError::Permanent("no scripted response".into())),
            }
        }
    }
}
