//! Scripted evaluator for tests and offline runs

use crate::evaluator::{Evaluator, EvaluatorOutput};
use std::sync::Mutex;
use std::time::Duration;

enum Reply {
    Text(String),
    Fail,
    Delay(Duration, String),
}

/// Answers prompts from a list of substring rules, first match wins.
/// Unmatched prompts get the fallback reply, or fail when none is set.
pub struct ScriptedEvaluator {
    rules: Vec<(String, Reply)>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call.
    pub fn failing() -> Self {
        Self::new()
    }

    pub fn respond_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    pub fn fail_when(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail));
        self
    }

    /// Sleep before replying. Useful for exercising timeouts.
    pub fn delay_when(
        mut self,
        needle: impl Into<String>,
        delay: Duration,
        reply: impl Into<String>,
    ) -> Self {
        self.rules
            .push((needle.into(), Reply::Delay(delay, reply.into())));
        self
    }

    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for ScriptedEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn execute(&self, prompt: &str, system_prompt: &str) -> EvaluatorOutput {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let haystack = format!("{}\n{}", system_prompt, prompt);
        let rule = self
            .rules
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()));

        match rule {
            Some((_, Reply::Text(text))) => EvaluatorOutput::ok(text.clone(), Duration::ZERO),
            Some((_, Reply::Fail)) => EvaluatorOutput::failed("scripted failure", Duration::ZERO),
            Some((_, Reply::Delay(delay, text))) => {
                tokio::time::sleep(*delay).await;
                EvaluatorOutput::ok(text.clone(), *delay)
            }
            None => match &self.fallback {
                Some(text) => EvaluatorOutput::ok(text.clone(), Duration::ZERO),
                None => EvaluatorOutput::failed("no scripted reply", Duration::ZERO),
            },
        }
    }
}
