//! Content-block conversion for Anthropic-style providers.
//!
//! This dialect keeps the system prompt out of the turn sequence, expresses
//! tool traffic as `tool_use`/`tool_result` content blocks, and rejects
//! requests whose turns do not strictly alternate user/assistant with
//! non-empty content. Tool results for one iteration must arrive in exactly
//! one user turn; fragmented result turns are rejected.

use ironloop_core::message::{Message, Role};
use serde::{Deserialize, Serialize};

/// Roles that survive conversion. System is extracted, tool folds into user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRole {
    User,
    Assistant,
}

/// One content block inside a converted turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A converted turn: a role plus its content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMessage {
    pub role: BlockRole,
    pub content: Vec<ContentBlock>,
}

/// The full converted request shape: system side channel + alternating turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<BlockMessage>,
}

/// Extract system messages from the message list.
///
/// This dialect takes the system prompt as a top-level field, not in the
/// turn sequence; multiple system messages are joined with blank lines.
fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut non_system: Vec<&Message> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(&msg.content),
            _ => non_system.push(msg),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, non_system)
}

/// Convert a role-based message sequence into content-block form.
///
/// Consecutive tool-role messages are one iteration's result batch and fold
/// into a single user turn. Empty-content messages are dropped, residual
/// same-role neighbors have their block arrays concatenated, and a sequence
/// that would open with an assistant turn gets a placeholder user turn, so
/// the output always satisfies the strict-alternation contract.
pub fn convert(messages: &[Message]) -> BlockConversation {
    let (system, rest) = extract_system(messages);

    let mut turns: Vec<BlockMessage> = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let msg = rest[i];
        match msg.role {
            Role::User => {
                if !msg.content.is_empty() {
                    turns.push(BlockMessage {
                        role: BlockRole::User,
                        content: vec![ContentBlock::Text {
                            text: msg.content.clone(),
                        }],
                    });
                }
                i += 1;
            }
            Role::Assistant => {
                let mut blocks: Vec<ContentBlock> = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: msg.content.clone(),
                    });
                }
                for tc in &msg.tool_calls {
                    let input: serde_json::Value =
                        serde_json::from_str(&tc.arguments).unwrap_or_default();
                    blocks.push(ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input,
                    });
                }
                if !blocks.is_empty() {
                    turns.push(BlockMessage {
                        role: BlockRole::Assistant,
                        content: blocks,
                    });
                }
                i += 1;
            }
            Role::Tool => {
                // One iteration's tool results arrive as a consecutive run;
                // they must land in exactly one user turn.
                let mut blocks: Vec<ContentBlock> = Vec::new();
                while i < rest.len() && rest[i].role == Role::Tool {
                    blocks.push(ContentBlock::ToolResult {
                        tool_use_id: rest[i].tool_call_id.clone().unwrap_or_default(),
                        content: rest[i].content.clone(),
                    });
                    i += 1;
                }
                turns.push(BlockMessage {
                    role: BlockRole::User,
                    content: blocks,
                });
            }
            Role::System => {
                i += 1; // handled separately
            }
        }
    }

    // Enforce alternation mechanically: concatenate residual same-role
    // neighbors' block arrays.
    let mut merged: Vec<BlockMessage> = Vec::new();
    for turn in turns {
        match merged.last_mut() {
            Some(prev) if prev.role == turn.role => prev.content.extend(turn.content),
            _ => merged.push(turn),
        }
    }

    if merged.first().map(|m| m.role) == Some(BlockRole::Assistant) {
        merged.insert(
            0,
            BlockMessage {
                role: BlockRole::User,
                content: vec![ContentBlock::Text {
                    text: "Continue.".into(),
                }],
            },
        );
    }

    BlockConversation {
        system,
        messages: merged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironloop_core::message::MessageToolCall;

    fn assert_alternating(conv: &BlockConversation) {
        for pair in conv.messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "consecutive same-role turns");
        }
        for turn in &conv.messages {
            assert!(!turn.content.is_empty(), "empty-content turn");
        }
    }

    #[test]
    fn system_messages_move_to_side_channel() {
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("hi"),
            Message::system("Stay terse."),
        ];
        let conv = convert(&messages);
        assert_eq!(
            conv.system.as_deref(),
            Some("You are helpful.\n\nStay terse.")
        );
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].role, BlockRole::User);
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let messages = vec![
            Message::user("search for rust"),
            Message::assistant_with_tools(
                "Searching now.",
                vec![MessageToolCall {
                    id: "call_1".into(),
                    name: "search".into(),
                    arguments: r#"{"query":"rust"}"#.into(),
                }],
            ),
        ];
        let conv = convert(&messages);
        let blocks = &conv.messages[1].content;
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
        match &blocks[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "search");
                assert_eq!(input["query"], "rust");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn one_iterations_results_fold_into_single_user_turn() {
        let messages = vec![
            Message::user("run both"),
            Message::assistant_with_tools(
                "",
                vec![
                    MessageToolCall {
                        id: "a".into(),
                        name: "one".into(),
                        arguments: "{}".into(),
                    },
                    MessageToolCall {
                        id: "b".into(),
                        name: "two".into(),
                        arguments: "{}".into(),
                    },
                ],
            ),
            Message::tool_result("a", "out a"),
            Message::tool_result("b", "out b"),
        ];
        let conv = convert(&messages);
        assert_eq!(conv.messages.len(), 3);
        let results = &conv.messages[2];
        assert_eq!(results.role, BlockRole::User);
        assert_eq!(results.content.len(), 2);
        assert!(
            results
                .content
                .iter()
                .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
        );
        assert_alternating(&conv);
    }

    #[test]
    fn empty_messages_drop_and_alternation_holds() {
        let messages = vec![
            Message::system("sys"),
            Message::user("first"),
            Message::user("second"),
            Message::assistant(""),
            Message::user("third"),
        ];
        let conv = convert(&messages);
        // Both user runs collapse around the dropped empty assistant turn.
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].content.len(), 3);
        assert_alternating(&conv);
    }

    #[test]
    fn leading_assistant_gets_placeholder_user_turn() {
        let messages = vec![Message::assistant("resuming where I left off")];
        let conv = convert(&messages);
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].role, BlockRole::User);
        assert_alternating(&conv);
    }

    #[test]
    fn tool_use_block_serialization() {
        let block = ContentBlock::ToolUse {
            id: "call_1".into(),
            name: "search".into(),
            input: serde_json::json!({"query": "rust"}),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains(r#""type":"tool_use""#));
    }

    #[test]
    fn unparseable_arguments_fall_back_to_null_input() {
        let messages = vec![Message::assistant_with_tools(
            "",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "search".into(),
                arguments: "not json".into(),
            }],
        )];
        let conv = convert(&messages);
        match &conv.messages[1].content[0] {
            ContentBlock::ToolUse { input, .. } => assert!(input.is_null()),
            other => panic!("expected tool_use, got {other:?}"),
        }
    }
}
