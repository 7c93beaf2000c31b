//! Tool invocation types and the executor trait.
//!
//! The engine never runs tool business logic itself. It hands requested
//! calls to a [`ToolExecutor`] collaborator and folds the results back into
//! the run. What the engine does own is captured here: the call/result
//! shapes and the per-tool concurrency metadata used for scheduling.

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id), the join key back
    /// to this call's [`ToolExecution`]
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl From<&ToolCall> for MessageToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        }
    }
}

/// The recorded result of running one [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// Which tool ran
    pub tool_name: String,

    /// The output text (or failure description)
    pub result: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Wall-clock execution time
    pub duration_ms: u64,

    /// Which iteration of the run issued this call
    pub iteration: usize,
}

impl ToolExecution {
    /// Build a failed execution record. Used for unknown tools, executor
    /// errors, crashed tasks, and calls skipped by cancellation.
    pub fn failed(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        reason: impl Into<String>,
        iteration: usize,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: reason.into(),
            success: false,
            duration_ms: 0,
            iteration,
        }
    }
}

/// Concurrency metadata for a registered tool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ToolProfile {
    /// Must run exclusively; nothing else may execute until it finishes
    /// (human-in-the-loop prompts, foreground-interactive commands)
    pub requires_blocking: bool,

    /// Must not run concurrently with other tools, but does not halt the
    /// surrounding workflow
    pub requires_serial: bool,
}

/// What a tool produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the tool considers the call successful
    pub success: bool,

    /// The output text handed back to the model
    pub output: String,
}

/// The tool registry/executor collaborator.
///
/// Implementations own tool business logic, argument validation, and
/// sandboxing. The engine only asks three things: what tools exist, how each
/// one schedules, and run-this-call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Look up scheduling metadata for a tool. `None` means unregistered.
    fn lookup(&self, name: &str) -> Option<ToolProfile>;

    /// Definitions of every registered tool, for advertising to the LLM.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute one call and return its outcome.
    async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolOutcome, ToolError>;
}
