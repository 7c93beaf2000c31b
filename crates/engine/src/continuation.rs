//! Stall detection and escalating continuation directives.
//!
//! When the model keeps planning instead of acting while tracked work is
//! still open, the engine injects a directive before the next iteration.
//! The directive sharpens with the escalation level, ending in a final
//! warning that names the only two acceptable responses. Which tools count
//! as planning is policy, so it comes from configuration rather than being
//! hard-coded here.

use ironloop_core::ToolCall;
use ironloop_core::task::TaskItem;

/// True when at least one call in the batch is a work tool, meaning any
/// tool not on the planning allow-list.
pub fn any_work_tool(calls: &[ToolCall], planning_tools: &[String]) -> bool {
    calls
        .iter()
        .any(|call| !planning_tools.iter().any(|p| p == &call.name))
}

/// Directive text for an escalation level. Levels above three clamp to the
/// final warning.
pub fn directive(level: u32, next_task: Option<&TaskItem>) -> String {
    let task_line = match next_task {
        Some(task) => format!(" The next pending task is: \"{}\".", task.title),
        None => String::new(),
    };
    match level {
        0 | 1 => format!(
            "You have pending work but produced no tool calls.{task_line} \
             Execute it now with the appropriate tool instead of describing \
             what you would do."
        ),
        2 => format!(
            "You are repeating plans without executing them. Stop narrating. \
             Do not explain, summarize, or restate the plan again.{task_line} \
             Call a work tool in this response."
        ),
        _ => format!(
            "FINAL WARNING: repeated responses have produced no work while \
             tasks remain incomplete.{task_line} Exactly two responses are \
             acceptable: call a work tool that advances the pending task, or \
             reply with {{\"status\": \"stop\"}} to end the run. Anything \
             else is invalid."
        ),
    }
}

/// Guidance appended to a failed tool result once the same tool keeps
/// failing. Returns `None` while the streak is short enough to be noise.
pub fn failure_guidance(streak: u32, tool_name: &str) -> Option<String> {
    match streak {
        0 | 1 => None,
        2 => Some(format!(
            "Note: \"{tool_name}\" has failed {streak} times in a row. \
             Adjust the arguments or approach before calling it again."
        )),
        _ => Some(format!(
            "Failure loop detected: \"{tool_name}\" has failed {streak} \
             consecutive times. Stop retrying the same call. Change your \
             approach, use a different tool, or reply with \
             {{\"status\": \"stop\"}} if the task cannot proceed."
        )),
    }
}
