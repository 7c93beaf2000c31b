//! Per-run mutable state and the immutable iteration audit trail.
//!
//! One [`WorkflowRun`] exists per task execution. It is owned exclusively by
//! the loop driving the run; nothing else mutates it. Each loop pass appends
//! one [`IterationRecord`]; records are never modified after creation.

use crate::message::{Message, Role};
use crate::tool::{ToolCall, ToolExecution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a single iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Tools ran and results were folded back
    Success,
    /// The model call or fold failed
    Error,
    /// A complete marker ended the run
    WorkflowComplete,
    /// A continue marker requested another pass
    ContinueSignal,
    /// The engine injected an auto-continuation directive
    AutoContinueInjected,
    /// The model finished with no tools and no markers
    NaturalCompletion,
}

/// Why the whole run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The model signalled the workflow is complete
    WorkflowComplete,
    /// The iteration budget ran out
    MaxIterationsReached,
    /// The model finished naturally with nothing left to do
    NaturalCompletion,
    /// The model signalled stop and no tracked work remained
    Stopped,
    /// The run was cancelled cooperatively
    Cancelled,
    /// An unrecoverable error ended the run
    Error,
}

/// Control signals detected in one pass over raw model text.
///
/// Derived transiently by the marker scanner, then folded into the
/// iteration record. Never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerFlags {
    /// A continue signal was present
    pub should_continue: bool,

    /// A complete signal was present
    pub complete: bool,

    /// A stop signal was present (possibly overridden, see the engine)
    pub stop: bool,

    /// Which pattern matched, for observability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
}

impl MarkerFlags {
    /// True if no signal of any kind was detected.
    pub fn is_empty(&self) -> bool {
        !self.should_continue && !self.complete && !self.stop
    }
}

/// Immutable snapshot of one loop pass, the audit trail unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 0-based iteration number
    pub iteration: usize,

    /// Tool calls the model requested, in request order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Execution results keyed by tool call ID
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tool_results: HashMap<String, ToolExecution>,

    /// Model text exactly as received
    pub raw_text: String,

    /// Model text with control markers stripped, for display/storage
    pub filtered_text: String,

    /// Control signals detected in the raw text
    pub markers: MarkerFlags,

    /// When the iteration began
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration of the whole pass
    pub duration_ms: u64,

    /// How the iteration ended
    pub response_status: ResponseStatus,
}

/// The summarized outcome handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Filtered text of the final model turn
    pub final_text: String,

    /// How many iterations ran
    pub iterations_used: usize,

    /// The full audit trail, preserved even on abnormal termination
    pub history: Vec<IterationRecord>,

    /// Why the run ended
    pub completion_reason: CompletionReason,

    /// Non-fatal errors encountered along the way
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Consecutive-failure streaks per tool name, within a sliding iteration
/// window. Updated only by the owning loop after a tool tier completes.
#[derive(Debug, Clone, Default)]
pub struct ToolFailureTracker {
    streaks: HashMap<String, FailureStreak>,
}

#[derive(Debug, Clone, Copy)]
struct FailureStreak {
    count: u32,
    last_iteration: usize,
}

impl ToolFailureTracker {
    /// Record a failure and return the updated streak length.
    ///
    /// A gap wider than `window` iterations since the last failure resets
    /// the streak before counting this one.
    pub fn record_failure(&mut self, tool_name: &str, iteration: usize, window: usize) -> u32 {
        let streak = self
            .streaks
            .entry(tool_name.to_string())
            .or_insert(FailureStreak {
                count: 0,
                last_iteration: iteration,
            });
        if iteration.saturating_sub(streak.last_iteration) > window {
            streak.count = 0;
        }
        streak.count += 1;
        streak.last_iteration = iteration;
        streak.count
    }

    /// A success breaks the streak.
    pub fn record_success(&mut self, tool_name: &str) {
        self.streaks.remove(tool_name);
    }

    /// Current streak length for a tool (0 if none).
    pub fn streak(&self, tool_name: &str) -> u32 {
        self.streaks.get(tool_name).map(|s| s.count).unwrap_or(0)
    }
}

/// Mutable state for one task execution.
///
/// `persistent_messages` is the durable conversation sent on every call;
/// `ephemeral_messages` holds per-iteration injections and is wiped at every
/// iteration start. A message meant for the *next* model call must therefore
/// go through [`WorkflowRun::defer_message`], which stores it until the next
/// [`WorkflowRun::begin_iteration`]. Appending it directly at the end of an
/// iteration would wipe it before the model ever sees it.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    /// 0-based index of the iteration currently executing
    pub iteration: usize,

    /// Hard iteration budget
    pub max_iterations: usize,

    /// Append-only audit trail, ordered by iteration number
    pub history: Vec<IterationRecord>,

    /// Durable conversation context sent on every call
    pub persistent_messages: Vec<Message>,

    /// Per-iteration injections, cleared at every iteration start
    pub ephemeral_messages: Vec<Message>,

    /// Whether the loop should run another iteration
    pub should_continue: bool,

    /// Set once, when the loop decides to terminate
    pub completion_reason: Option<CompletionReason>,

    /// How many auto-continuation directives have been issued
    pub auto_continue_attempts: u32,

    /// Consecutive iterations in which no work tool was called
    pub planning_only_iterations: u32,

    /// Intervention text stored by this iteration for injection at the
    /// start of the next one
    pending_intervention: Option<String>,

    /// Opaque provider session token carried between calls
    pub session_marker: Option<String>,

    /// Per-tool consecutive-failure streaks
    pub failures: ToolFailureTracker,
}

impl WorkflowRun {
    /// Create run state for a task, seeding the conversation with the task
    /// as the opening user turn.
    pub fn new(task: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            history: Vec::new(),
            persistent_messages: vec![Message::user(task)],
            ephemeral_messages: Vec::new(),
            should_continue: true,
            completion_reason: None,
            auto_continue_attempts: 0,
            planning_only_iterations: 0,
            pending_intervention: None,
            session_marker: None,
            failures: ToolFailureTracker::default(),
        }
    }

    /// Start an iteration: wipe ephemeral state, then surface any deferred
    /// intervention as this iteration's injection.
    pub fn begin_iteration(&mut self) {
        self.ephemeral_messages.clear();
        if let Some(text) = self.pending_intervention.take() {
            self.ephemeral_messages.push(Message::user(text));
        }
    }

    /// Store a message for injection at the start of the next iteration.
    pub fn defer_message(&mut self, text: impl Into<String>) {
        self.pending_intervention = Some(text.into());
    }

    /// Whether an intervention is waiting for the next iteration.
    pub fn has_pending_intervention(&self) -> bool {
        self.pending_intervention.is_some()
    }

    /// The full message sequence for the next provider call.
    pub fn request_messages(&self) -> Vec<Message> {
        let mut messages = self.persistent_messages.clone();
        messages.extend(self.ephemeral_messages.iter().cloned());
        messages
    }

    /// Append an iteration record and advance the counter.
    pub fn push_record(&mut self, record: IterationRecord) {
        self.history.push(record);
        self.iteration += 1;
    }

    /// Terminate the run with the given reason.
    pub fn finish(&mut self, reason: CompletionReason) {
        self.should_continue = false;
        self.completion_reason = Some(reason);
    }

    /// A work tool ran this iteration: real progress forgives past stalling.
    pub fn note_work_progress(&mut self) {
        self.planning_only_iterations = 0;
        self.auto_continue_attempts = 0;
        self.pending_intervention = None;
    }

    /// No work tool ran this iteration.
    pub fn note_planning_stall(&mut self) {
        self.planning_only_iterations += 1;
    }

    /// Escalation level for the next directive.
    pub fn effective_escalation(&self) -> u32 {
        self.auto_continue_attempts.max(self.planning_only_iterations)
    }

    /// Drop the trailing assistant turn from the durable conversation.
    ///
    /// Used in workflow mode before re-prompting a stalled model, so it does
    /// not re-read its own narration and repeat it verbatim. Returns whether
    /// a turn was removed. The audit trail is untouched.
    pub fn remove_last_assistant_turn(&mut self) -> bool {
        if self
            .persistent_messages
            .last()
            .is_some_and(|m| m.role == Role::Assistant)
        {
            self.persistent_messages.pop();
            true
        } else {
            false
        }
    }

    /// Summarize the run into its result, consuming the state.
    pub fn into_result(self, errors: Vec<String>) -> WorkflowResult {
        let final_text = self
            .history
            .iter()
            .rev()
            .find(|r| !r.filtered_text.is_empty())
            .map(|r| r.filtered_text.clone())
            .unwrap_or_default();
        WorkflowResult {
            final_text,
            iterations_used: self.history.len(),
            history: self.history,
            completion_reason: self.completion_reason.unwrap_or(CompletionReason::Error),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iteration: usize, text: &str, status: ResponseStatus) -> IterationRecord {
        IterationRecord {
            iteration,
            tool_calls: Vec::new(),
            tool_results: HashMap::new(),
            raw_text: text.into(),
            filtered_text: text.into(),
            markers: MarkerFlags::default(),
            started_at: Utc::now(),
            duration_ms: 1,
            response_status: status,
        }
    }

    #[test]
    fn deferred_message_survives_iteration_boundary() {
        let mut run = WorkflowRun::new("task", 10);
        run.defer_message("do the thing");
        // Not visible yet: the current iteration already built its request.
        assert!(run.ephemeral_messages.is_empty());

        run.begin_iteration();
        assert_eq!(run.ephemeral_messages.len(), 1);
        assert_eq!(run.ephemeral_messages[0].content, "do the thing");
        assert!(!run.has_pending_intervention());

        // The next boundary wipes it again.
        run.begin_iteration();
        assert!(run.ephemeral_messages.is_empty());
    }

    #[test]
    fn request_messages_appends_ephemeral_after_persistent() {
        let mut run = WorkflowRun::new("task", 10);
        run.persistent_messages.push(Message::assistant("ok"));
        run.ephemeral_messages.push(Message::user("reminder"));
        let messages = run.request_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "reminder");
    }

    #[test]
    fn push_record_advances_iteration() {
        let mut run = WorkflowRun::new("task", 10);
        run.push_record(record(0, "a", ResponseStatus::Success));
        assert_eq!(run.iteration, 1);
        assert_eq!(run.history.len(), 1);
    }

    #[test]
    fn work_progress_resets_escalation_state() {
        let mut run = WorkflowRun::new("task", 10);
        run.note_planning_stall();
        run.note_planning_stall();
        run.auto_continue_attempts = 2;
        run.defer_message("pending nudge");
        assert_eq!(run.effective_escalation(), 2);

        run.note_work_progress();
        assert_eq!(run.effective_escalation(), 0);
        assert!(!run.has_pending_intervention());
    }

    #[test]
    fn failure_streak_grows_resets_on_gap_and_clears_on_success() {
        let mut tracker = ToolFailureTracker::default();
        assert_eq!(tracker.record_failure("search", 1, 5), 1);
        assert_eq!(tracker.record_failure("search", 2, 5), 2);
        assert_eq!(tracker.record_failure("search", 3, 5), 3);
        // A gap wider than the window starts a fresh streak.
        assert_eq!(tracker.record_failure("search", 20, 5), 1);
        tracker.record_success("search");
        assert_eq!(tracker.streak("search"), 0);
    }

    #[test]
    fn remove_last_assistant_turn_only_pops_assistant() {
        let mut run = WorkflowRun::new("task", 10);
        assert!(!run.remove_last_assistant_turn());
        run.persistent_messages.push(Message::assistant("stalled plan"));
        assert!(run.remove_last_assistant_turn());
        assert_eq!(run.persistent_messages.len(), 1);
    }

    #[test]
    fn result_uses_last_nonempty_filtered_text() {
        let mut run = WorkflowRun::new("task", 10);
        run.push_record(record(0, "first answer", ResponseStatus::Success));
        run.push_record(record(1, "", ResponseStatus::ContinueSignal));
        run.finish(CompletionReason::NaturalCompletion);
        let result = run.into_result(Vec::new());
        assert_eq!(result.final_text, "first answer");
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.completion_reason, CompletionReason::NaturalCompletion);
    }
}
