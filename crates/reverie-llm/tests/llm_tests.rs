//! Tests for reverie-llm: request types, the evaluator contract, and the LLM-backed evaluator

use futures::stream;
use reverie_llm::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===========================================================================
// Completion
// ===========================================================================

#[test]
fn completion_defaults() {
    let c = Completion::new(DEFAULT_MODEL, "Rate this");
    assert!(c.model.contains("claude"));
    assert_eq!(c.max_tokens, DEFAULT_MAX_TOKENS);
    assert!(c.system.is_none());
    assert!(c.temperature.is_none());
}

#[test]
fn blank_system_prompt_dropped() {
    assert!(Completion::new("m", "p").with_system("  ").system.is_none());
    assert_eq!(Completion::new("m", "p").with_system("be terse").system.as_deref(), Some("be terse"));
    assert_eq!(Completion::new("m", "p").with_max_tokens(0).max_tokens, 1);
}

// ===========================================================================
// ProviderError
// ===========================================================================

#[test]
fn provider_error_display_and_transience() {
    let limited = ProviderError::RateLimited { retry_after: Some(Duration::from_millis(500)) };
    assert_eq!(limited.to_string(), "rate limited, retry after 500ms");
    assert_eq!(ProviderError::RateLimited { retry_after: None }.to_string(), "rate limited");
    assert!(limited.is_transient());
    assert!(ProviderError::Http { status: 503, body: String::new() }.is_transient());
    assert!(!ProviderError::Http { status: 400, body: String::new() }.is_transient());
    assert!(!ProviderError::Unauthorized("bad key".into()).is_transient());
    assert_eq!(ProviderError::Cancelled.to_string(), "cancelled");
}

// ===========================================================================
// ScriptedEvaluator
// ===========================================================================

#[tokio::test]
async fn scripted_first_matching_rule_wins() {
    let ev = ScriptedEvaluator::new()
        .respond_when("EMPATHY", "EMPATHY: 0.8")
        .respond_when("score", "unused");
    let out = ev.execute("score EMPATHY please", "").await;
    assert!(out.success);
    assert_eq!(out.content, "EMPATHY: 0.8");
    assert_eq!(ev.call_count(), 1);
}

#[tokio::test]
async fn scripted_matches_system_prompt_too() {
    let ev = ScriptedEvaluator::new().respond_when("pattern analyst", "1. Loops recur");
    let out = ev.execute("thoughts...", "You are a pattern analyst").await;
    assert!(out.success);
}

#[tokio::test]
async fn scripted_fallback_and_failure() {
    let failing = ScriptedEvaluator::failing();
    assert!(!failing.execute("anything", "").await.success);

    let fallback = ScriptedEvaluator::new()
        .fail_when("broken")
        .with_fallback("ok");
    assert!(!fallback.execute("broken prompt", "").await.success);
    assert_eq!(fallback.execute("other", "").await.content, "ok");
    assert_eq!(fallback.prompts(), vec!["broken prompt", "other"]);
}

// ===========================================================================
// execute_bounded
// ===========================================================================

#[tokio::test]
async fn bounded_call_times_out() {
    let ev = ScriptedEvaluator::new().delay_when("slow", Duration::from_secs(5), "late");
    let cancel = CancellationToken::new();
    let out = execute_bounded(&ev, "slow", "", Duration::from_millis(20), &cancel).await;
    assert!(!out.success);
    assert_eq!(out.content, "timeout");
}

#[tokio::test]
async fn bounded_call_cancels() {
    let ev = ScriptedEvaluator::new().delay_when("slow", Duration::from_secs(5), "late");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let out = execute_bounded(&ev, "slow", "", Duration::from_secs(10), &cancel).await;
    assert!(!out.success);
    assert_eq!(out.content, "cancelled");
}

#[tokio::test]
async fn bounded_call_passes_through() {
    let ev = ScriptedEvaluator::new().with_fallback("fine");
    let cancel = CancellationToken::new();
    let out = execute_bounded(&ev, "x", "", Duration::from_secs(1), &cancel).await;
    assert!(out.success);
    assert_eq!(out.content, "fine");
}

// ===========================================================================
// LlmEvaluator over a canned provider
// ===========================================================================

enum Script {
    Chunks(Vec<Chunk>),
    ChunksThenError(Vec<Chunk>, &'static str),
    Reject(fn() -> ProviderError),
}

/// Plays one script per call, repeating the last one.
struct CannedProvider {
    scripts: Vec<Script>,
    seen: Mutex<Vec<Completion>>,
}

#[async_trait::async_trait]
impl LlmProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    async fn stream(&self, completion: Completion, _cancel: CancellationToken) -> ProviderResult<ChunkStream> {
        let call = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(completion);
            seen.len() - 1
        };
        let items: Vec<ProviderResult<Chunk>> = match &self.scripts[call.min(self.scripts.len() - 1)] {
            Script::Chunks(chunks) => chunks.iter().cloned().map(Ok).collect(),
            Script::ChunksThenError(chunks, message) => chunks
                .iter()
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(ProviderError::Stream(message.to_string()))))
                .collect(),
            Script::Reject(error) => return Err(error()),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

fn canned(scripts: Vec<Script>) -> Arc<CannedProvider> {
    Arc::new(CannedProvider { scripts, seen: Mutex::new(Vec::new()) })
}

fn finished() -> Chunk {
    Chunk::Finished { stop_reason: Some("end_turn".into()), usage: TokenUsage::default() }
}

#[tokio::test]
async fn llm_evaluator_joins_text_chunks() {
    let provider = canned(vec![Script::Chunks(vec![
        Chunk::Text("COHERENCE: ".into()),
        Chunk::Text("0.6".into()),
        finished(),
        Chunk::Text("ignored".into()),
    ])]);
    let ev = LlmEvaluator::new(provider.clone(), "canned-1").with_max_tokens(64);
    let out = ev.execute("score it", "be terse").await;
    assert!(out.success);
    assert_eq!(out.content, "COHERENCE: 0.6");

    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen[0].max_tokens, 64);
    assert_eq!(seen[0].system.as_deref(), Some("be terse"));
    assert_eq!(seen[0].prompt, "score it");
}

#[tokio::test]
async fn llm_evaluator_does_not_retry_auth_failure() {
    let provider = canned(vec![Script::Reject(|| ProviderError::Unauthorized("bad key".into()))]);
    let ev = LlmEvaluator::new(provider.clone(), "canned-1").with_retries(3, Duration::from_millis(1));
    let out = ev.execute("x", "").await;
    assert!(!out.success);
    assert!(out.content.contains("bad key"));
    assert_eq!(provider.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn llm_evaluator_retries_transient_failure() {
    let provider = canned(vec![
        Script::Reject(|| ProviderError::Overloaded("busy".into())),
        Script::Chunks(vec![Chunk::Text("EMPATHY: 0.4".into()), finished()]),
    ]);
    let ev = LlmEvaluator::new(provider.clone(), "canned-1").with_retries(2, Duration::from_millis(1));
    let out = ev.execute("x", "").await;
    assert!(out.success);
    assert_eq!(out.content, "EMPATHY: 0.4");
    assert_eq!(provider.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn llm_evaluator_gives_up_after_attempts() {
    let provider = canned(vec![Script::Reject(|| ProviderError::RateLimited { retry_after: None })]);
    let ev = LlmEvaluator::new(provider.clone(), "canned-1").with_retries(3, Duration::from_millis(1));
    assert!(!ev.execute("x", "").await.success);
    assert_eq!(provider.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn llm_evaluator_empty_response_is_failure() {
    let ev = LlmEvaluator::new(canned(vec![Script::Chunks(vec![Chunk::Text("  ".into())])]), "canned-1");
    let out = ev.execute("x", "").await;
    assert!(!out.success);
    assert_eq!(out.content, "empty response");
}

#[tokio::test]
async fn llm_evaluator_stream_error_is_failure() {
    let provider = canned(vec![Script::ChunksThenError(vec![Chunk::Text("partial".into())], "overloaded")]);
    let ev = LlmEvaluator::new(provider, "canned-1").with_retries(1, Duration::from_millis(1));
    let out = ev.execute("x", "").await;
    assert!(!out.success);
    assert!(out.content.contains("overloaded"));
}

#[test]
fn anthropic_provider_name() {
    assert_eq!(AnthropicProvider::new("key").name(), "anthropic");
}
