//! Opaque text-in/text-out evaluator contract
//!
//! Callers never see evaluator errors: a failed call is an `EvaluatorOutput`
//! with `success = false`, and every caller has a local fallback.

use crate::provider::{LlmProvider, ProviderError, ProviderResult};
use crate::types::{Chunk, Completion, DEFAULT_MAX_TOKENS};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_RETRY_PAUSE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluatorOutput {
    pub success: bool,
    pub content: String,
    pub duration: Duration,
}

impl EvaluatorOutput {
    pub fn ok(content: impl Into<String>, duration: Duration) -> Self {
        Self { success: true, content: content.into(), duration }
    }

    pub fn failed(reason: impl Into<String>, duration: Duration) -> Self {
        Self { success: false, content: reason.into(), duration }
    }
}

#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    async fn execute(&self, prompt: &str, system_prompt: &str) -> EvaluatorOutput;
}

#[async_trait::async_trait]
impl<T: Evaluator + ?Sized> Evaluator for Arc<T> {
    async fn execute(&self, prompt: &str, system_prompt: &str) -> EvaluatorOutput {
        (**self).execute(prompt, system_prompt).await
    }
}

/// Run an evaluator call with a deadline and a cancellation token.
/// Timeout and cancellation both produce a failed output.
pub async fn execute_bounded(
    evaluator: &dyn Evaluator,
    prompt: &str,
    system_prompt: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> EvaluatorOutput {
    let start = Instant::now();
    tokio::select! {
        result = tokio::time::timeout(timeout, evaluator.execute(prompt, system_prompt)) => {
            match result {
                Ok(output) => output,
                Err(_) => {
                    warn!("Evaluator timed out after {}ms", timeout.as_millis());
                    EvaluatorOutput::failed("timeout", start.elapsed())
                }
            }
        }
        _ = cancel.cancelled() => {
            debug!("Evaluator call cancelled");
            EvaluatorOutput::failed("cancelled", start.elapsed())
        }
    }
}

/// Evaluator backed by a streaming provider. Text chunks are joined into one
/// answer; transient provider errors are retried with a growing pause.
pub struct LlmEvaluator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    attempts: u32,
    backoff: Duration,
}

impl LlmEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            attempts: 2,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Total tries per call (at least one) and the pause before the second.
    pub fn with_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, completion: Completion) -> ProviderResult<String> {
        // Dropping this call (timeout, cancellation upstream) closes the connection.
        let cancel = CancellationToken::new();
        let _close_on_drop = cancel.clone().drop_guard();

        let mut stream = self.provider.stream(completion, cancel).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                Chunk::Text(t) => text.push_str(&t),
                Chunk::Finished { stop_reason, usage } => {
                    debug!(
                        "{} answered: {} chars, {} tokens, stop_reason={:?}",
                        self.provider.name(),
                        text.len(),
                        usage.total(),
                        stop_reason
                    );
                    break;
                }
            }
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl Evaluator for LlmEvaluator {
    async fn execute(&self, prompt: &str, system_prompt: &str) -> EvaluatorOutput {
        let start = Instant::now();
        let completion = Completion::new(self.model.clone(), prompt)
            .with_system(system_prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);

        let mut attempt = 1;
        loop {
            let error: ProviderError = match self.attempt(completion.clone()).await {
                Ok(text) if text.trim().is_empty() => {
                    warn!("Evaluator returned empty response");
                    return EvaluatorOutput::failed("empty response", start.elapsed());
                }
                Ok(text) => return EvaluatorOutput::ok(text, start.elapsed()),
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= self.attempts {
                warn!("Evaluator request via {} failed: {}", self.provider.name(), error);
                return EvaluatorOutput::failed(error.to_string(), start.elapsed());
            }
            let pause = error
                .retry_after()
                .unwrap_or(self.backoff * attempt)
                .min(MAX_RETRY_PAUSE);
            debug!("Retrying evaluator call in {}ms ({})", pause.as_millis(), error);
            tokio::time::sleep(pause).await;
            attempt += 1;
        }
    }
}
