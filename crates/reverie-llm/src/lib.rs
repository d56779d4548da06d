//! Reverie LLM - the text-in/text-out evaluator contract and the providers behind it

pub mod anthropic;
pub mod evaluator;
pub mod provider;
pub mod scripted;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use evaluator::{execute_bounded, Evaluator, EvaluatorOutput, LlmEvaluator};
pub use provider::{ChunkStream, LlmProvider, ProviderError, ProviderResult};
pub use scripted::ScriptedEvaluator;
pub use tokio_util::sync::CancellationToken;
pub use types::{Chunk, Completion, TokenUsage, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
