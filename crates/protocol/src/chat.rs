//! Role-preserving normalization for OpenAI-style providers.
//!
//! These providers keep discrete system/user/assistant/tool roles but reject
//! consecutive same-role user or assistant turns. Normalization merges such
//! runs into one turn; tool-role messages are exempt and pass through
//! untouched, as are system messages.

use ironloop_core::message::{Message, Role};

/// Merge consecutive same-role user/assistant messages.
///
/// Merged content is joined with a blank line. Tool-call metadata of the
/// later message takes precedence; a later message without tool calls keeps
/// the earlier ones. Tool and system messages never merge.
pub fn normalize(messages: &[Message]) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());

    for msg in messages {
        let mergeable = matches!(msg.role, Role::User | Role::Assistant);
        match result.last_mut() {
            Some(prev) if mergeable && prev.role == msg.role => {
                if !msg.content.is_empty() {
                    if !prev.content.is_empty() {
                        prev.content.push_str("\n\n");
                    }
                    prev.content.push_str(&msg.content);
                }
                if !msg.tool_calls.is_empty() {
                    prev.tool_calls = msg.tool_calls.clone();
                }
            }
            _ => result.push(msg.clone()),
        }
    }

    result
}
