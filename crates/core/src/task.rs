//! Task-tracking store collaborator.
//!
//! The engine consults tracked tasks for exactly two decisions: whether a
//! `stop` signal may be honored, and whether auto-continuation should fire.
//! Where tasks come from (todo files, an issue tracker, a scratchpad tool)
//! is the implementation's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// State of one tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One tracked task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// First task that still needs work, in store order.
pub fn first_incomplete(tasks: &[TaskItem]) -> Option<&TaskItem> {
    tasks.iter().find(|t| !t.status.is_complete())
}

/// The task-tracking store collaborator.
///
/// Infallible by contract: an implementation that cannot read its backing
/// store should log and return an empty list rather than fail the run.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Snapshot of all tracked tasks.
    async fn read_tasks(&self) -> Vec<TaskItem>;
}
