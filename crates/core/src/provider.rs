//! ProviderClient trait, the abstraction over LLM backends.
//!
//! A provider client knows how to send a request to an LLM and get a response
//! back, either as a complete message or as a stream of chunks. The actual
//! HTTP wire clients live outside the engine; the orchestration loop calls
//! `send()` or `stream()` without knowing which backend is in use.

use crate::error::ProviderError;
use crate::tool::ToolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<crate::message::Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Opaque provider-issued session continuation token, echoed back to
    /// enable delta-only multi-turn sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_marker: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn
    Stop,
    /// The model requested tool executions
    ToolUse,
    /// Output token limit reached
    Length,
    /// The provider's content filter rejected the generation
    ContentFilter,
    /// Anything else (provider-specific)
    Other,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text content
    pub content: String,

    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Why generation stopped
    pub finish_reason: FinishReason,

    /// Opaque session continuation token, if the provider issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_marker: Option<String>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// How a provider's stream reports text progress.
///
/// Incremental streams send only the new text in each chunk; cumulative
/// streams resend the entire message so far. Mixing the two up corrupts
/// accumulated content, so every client declares which one it speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    /// Each chunk carries only new text
    Incremental,
    /// Each chunk carries the whole message so far
    Cumulative,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text payload, interpreted per the client's [`DeltaMode`]
    #[serde(default)]
    pub content: Option<String>,

    /// Partial tool-call fragments carried by this chunk
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,

    /// Why generation stopped (typically only on the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,

    /// Session continuation token (typically only on the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_marker: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One fragment of a tool call arriving over a stream.
///
/// Providers split a single call's id, name, and argument JSON across many
/// chunks. `index` is the call's position within the message and is the only
/// stable key for reassembly; arrival order is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Position of the call within the assistant message
    pub index: u32,

    /// Call ID, present on whichever fragment first announces it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool name, present on whichever fragment first announces it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// A slice of the argument JSON string, appended in arrival order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The provider client trait.
///
/// Every LLM backend implements this. The engine calls `send()` or `stream()`
/// without knowing which backend is in use.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openrouter", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn send(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `send()` and wraps the result as a single
    /// final chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.send(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let tool_calls = response
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, call)| ToolCallFragment {
                index: i as u32,
                id: Some(call.id.clone()),
                name: Some(call.name.clone()),
                arguments: Some(call.arguments.to_string()),
            })
            .collect();
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                tool_calls,
                finish_reason: Some(response.finish_reason),
                session_marker: response.session_marker,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Which streaming semantics this client's chunks use.
    fn delta_mode(&self) -> DeltaMode {
        DeltaMode::Incremental
    }
}
