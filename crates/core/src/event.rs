//! Engine event system.
//!
//! One event vocabulary serves two transports: a streaming run delivers the
//! full ordered sequence over its own channel, and an optional broadcast bus
//! re-publishes the coarse subset (everything except per-token deltas) for
//! observers that only care about lifecycle.

use crate::run::{ResponseStatus, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted by the engine while a run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A run began.
    RunStarted { model: String, max_iterations: usize },

    /// Partial text from the model, already reconciled to incremental form.
    Delta { content: String },

    /// The model requested a tool call (not yet executing).
    ToolCallObserved { id: String, name: String },

    /// A tool call was dispatched.
    ToolStarted { id: String, name: String },

    /// A tool call finished.
    ToolFinished {
        id: String,
        name: String,
        success: bool,
        duration_ms: u64,
    },

    /// One loop pass completed.
    IterationCompleted {
        iteration: usize,
        status: ResponseStatus,
    },

    /// A control marker was detected in model output.
    MarkerDetected { pattern: String },

    /// An auto-continuation directive was stored for the next iteration.
    InterventionInjected { level: u8 },

    /// The conversation was compacted before a model call.
    CompactionPerformed {
        before_tokens: usize,
        after_tokens: usize,
    },

    /// A provider call failed transiently and will be retried.
    RetryScheduled { attempt: u32, delay_ms: u64 },

    /// The run finished with its final result.
    Done { result: WorkflowResult },

    /// An error occurred mid-run.
    Error { message: String },
}

impl EngineEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::Delta { .. } => "delta",
            Self::ToolCallObserved { .. } => "tool_call_observed",
            Self::ToolStarted { .. } => "tool_started",
            Self::ToolFinished { .. } => "tool_finished",
            Self::IterationCompleted { .. } => "iteration_completed",
            Self::MarkerDetected { .. } => "marker_detected",
            Self::InterventionInjected { .. } => "intervention_injected",
            Self::CompactionPerformed { .. } => "compaction_performed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// A broadcast-based event bus for engine events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Observers
/// subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<EngineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
