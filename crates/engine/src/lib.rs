//! # Ironloop Engine
//!
//! The orchestration core of ironloop: a provider-agnostic autonomous
//! workflow loop with bounded retries, control-marker resolution, tiered
//! tool scheduling, context budget enforcement, and stall intervention.
//!
//! The entry point is [`WorkflowEngine`]. Every external concern comes in
//! as an `Arc<dyn Trait>` implementation of the collaborator contracts
//! defined in `ironloop-core`; the engine itself performs no network or
//! filesystem I/O.

pub mod budget;
pub mod continuation;
pub mod engine;
pub mod marker;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use budget::{BudgetController, BudgetOutcome};
pub use engine::WorkflowEngine;
pub use retry::RetryPolicy;
