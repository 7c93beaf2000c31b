//! # Ironloop Core
//!
//! Domain types, collaborator traits, and error definitions for the ironloop
//! agent orchestration engine. This crate defines the domain model that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model provider, tool executor, token
//! estimator, compactor, task store) is defined as a trait here.
//! Implementations live outside the engine. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod compact;
pub mod error;
pub mod estimator;
pub mod event;
pub mod message;
pub mod provider;
pub mod run;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use compact::Compactor;
pub use error::{CompactError, Error, ProviderError, Result, ToolError};
pub use estimator::{HeuristicEstimator, TokenEstimator};
pub use event::{EngineEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    DeltaMode, FinishReason, ProviderClient, ProviderRequest, ProviderResponse, StreamChunk,
    ToolCallFragment, ToolDefinition, Usage,
};
pub use run::{
    CompletionReason, IterationRecord, MarkerFlags, ResponseStatus, WorkflowResult, WorkflowRun,
};
pub use task::{TaskItem, TaskStatus, TaskStore};
pub use tool::{ToolCall, ToolExecution, ToolExecutor, ToolOutcome, ToolProfile};
