//! Token estimation collaborator.
//!
//! The engine never counts tokens itself; it asks a [`TokenEstimator`].
//! The bundled [`HeuristicEstimator`] uses a character-based heuristic
//! (~4 characters per token), accurate within ~10% for BPE tokenizers
//! on English text. Swap in a real tokenizer via the trait when that
//! matters.

use crate::message::Message;
use crate::provider::ToolDefinition;

/// Per-message overhead for role name, delimiters, and formatting markers
/// in the API wire format.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Context-window size assumed for models not in the table.
pub const DEFAULT_CONTEXT_LIMIT: usize = 128_000;

/// The token estimator collaborator.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the token count for a string.
    fn estimate(&self, text: &str) -> usize;

    /// The context-window size for a model, with a generic fallback for
    /// unknown names.
    fn context_limit(&self, model: &str) -> usize;

    /// Estimate tokens for a single message including per-message overhead
    /// and any embedded tool-call arguments.
    fn estimate_message(&self, message: &Message) -> usize {
        let args: usize = message
            .tool_calls
            .iter()
            .map(|c| self.estimate(&c.arguments))
            .sum();
        MESSAGE_OVERHEAD_TOKENS + self.estimate(&message.content) + args
    }

    /// Estimate tokens for a slice of messages.
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Estimate tokens for tool definitions (serialized as JSON).
    fn estimate_tools(&self, tools: &[ToolDefinition]) -> usize {
        tools
            .iter()
            .map(|t| self.estimate(&serde_json::to_string(t).unwrap_or_default()))
            .sum()
    }
}

/// Character-count heuristic estimator: 1 token ≈ 4 characters. Rounds up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() + 3) / 4
    }

    fn context_limit(&self, model: &str) -> usize {
        let model = model.to_ascii_lowercase();
        if model.contains("claude") {
            200_000
        } else if model.contains("gemini") || model.contains("gpt-4.1") {
            1_000_000
        } else if model.contains("o3") || model.contains("o4") {
            200_000
        } else {
            DEFAULT_CONTEXT_LIMIT
        }
    }
}
