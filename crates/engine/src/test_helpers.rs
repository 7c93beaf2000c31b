//! Shared mocks and builders for engine tests.

use std::sync::Mutex;

use async_trait::async_trait;
use ironloop_core::task::{TaskItem, TaskStatus, TaskStore};
use ironloop_core::{
    FinishReason, ProviderClient, ProviderError, ProviderRequest, ProviderResponse, ToolCall,
    ToolDefinition, ToolError, ToolExecutor, ToolOutcome, ToolProfile, Usage,
};

/// Scripted provider: returns canned results in order and records every
/// request it receives. Panics when the script runs out, which keeps a
/// runaway loop from hanging a test.
pub(crate) struct SequentialMockProvider {
    script: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub(crate) fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub(crate) fn scripted(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The nth request the engine sent, cloned for inspection.
    pub(crate) fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ProviderClient for SequentialMockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let script = self.script.lock().unwrap();
        let index = requests.len();
        let Some(entry) = script.get(index) else {
            panic!(
                "SequentialMockProvider exhausted: call #{}, scripted {}",
                index + 1,
                script.len()
            );
        };
        requests.push(request);
        entry.clone()
    }
}

/// Executor that accepts every tool name, logs invocations in order, and
/// succeeds unless the name is on the failure list. Failures are reported
/// through [`ToolOutcome`], the way a real tool reports its own errors.
pub(crate) struct RecordingExecutor {
    pub(crate) log: Mutex<Vec<String>>,
    fail: Vec<String>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            fail: Vec::new(),
        }
    }

    pub(crate) fn failing(names: &[&str]) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            fail: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    fn lookup(&self, _name: &str) -> Option<ToolProfile> {
        Some(ToolProfile::default())
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "write_file".into(),
            description: "Write content to a file".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }),
        }]
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        self.log.lock().unwrap().push(call.name.clone());
        if self.fail.iter().any(|n| n == &call.name) {
            return Ok(ToolOutcome {
                success: false,
                output: format!("simulated failure from {}", call.name),
            });
        }
        Ok(ToolOutcome {
            success: true,
            output: format!("{} ok", call.name),
        })
    }
}

/// Task store backed by a plain vector.
pub(crate) struct InMemoryTaskStore {
    tasks: Mutex<Vec<TaskItem>>,
}

impl InMemoryTaskStore {
    pub(crate) fn with_pending(titles: &[&str]) -> Self {
        let tasks = titles
            .iter()
            .enumerate()
            .map(|(i, title)| TaskItem {
                id: format!("task_{i}"),
                title: title.to_string(),
                status: TaskStatus::Pending,
            })
            .collect();
        Self {
            tasks: Mutex::new(tasks),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn read_tasks(&self) -> Vec<TaskItem> {
        self.tasks.lock().unwrap().clone()
    }
}

pub(crate) fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        tool_calls: Vec::new(),
        finish_reason: FinishReason::Stop,
        session_marker: None,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

pub(crate) fn make_tool_call_response(
    tool_calls: Vec<ToolCall>,
    thought: &str,
) -> ProviderResponse {
    ProviderResponse {
        content: thought.to_string(),
        tool_calls,
        finish_reason: FinishReason::ToolUse,
        session_marker: None,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

pub(crate) fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args,
    }
}
