//! Streaming delta reconciliation.
//!
//! Two hazards live here. First, providers disagree on chunk semantics:
//! incremental streams send only new text, cumulative streams resend the
//! whole message so far, and applying the wrong interpretation silently
//! corrupts everything downstream. Second, tool calls arrive shredded
//! across chunks, keyed by position index rather than arrival order, and
//! must not be acted on until fully assembled.

use ironloop_core::provider::{DeltaMode, ToolCallFragment};
use ironloop_core::tool::ToolCall;
use std::collections::BTreeMap;
use tracing::warn;

/// Reconciles one in-flight message's text chunks into UI-facing deltas.
#[derive(Debug, Clone)]
pub struct DeltaTracker {
    mode: DeltaMode,
    seen: String,
}

impl DeltaTracker {
    pub fn new(mode: DeltaMode) -> Self {
        Self {
            mode,
            seen: String::new(),
        }
    }

    /// Fold in one chunk's text and return the new text it contributes,
    /// or `None` if it contributes nothing.
    ///
    /// Cumulative chunks are diffed against the last-seen string. A
    /// cumulative chunk that does not extend the last-seen string means the
    /// provider restarted the message; the stored text is replaced and the
    /// whole chunk is emitted.
    pub fn apply(&mut self, chunk: &str) -> Option<String> {
        if chunk.is_empty() {
            return None;
        }
        match self.mode {
            DeltaMode::Incremental => {
                self.seen.push_str(chunk);
                Some(chunk.to_string())
            }
            DeltaMode::Cumulative => {
                if let Some(delta) = chunk.strip_prefix(self.seen.as_str()) {
                    if delta.is_empty() {
                        return None;
                    }
                    let delta = delta.to_string();
                    self.seen = chunk.to_string();
                    Some(delta)
                } else {
                    self.seen = chunk.to_string();
                    Some(chunk.to_string())
                }
            }
        }
    }

    /// The complete message text accumulated so far.
    pub fn full_text(&self) -> &str {
        &self.seen
    }
}

/// Reassembles fragmented tool calls arriving across many chunks.
///
/// Fragments are keyed by their explicit position index. A call is complete
/// only once an id, a name, and non-empty arguments have all been observed;
/// anything less at stream end is dropped with a warning rather than handed
/// to the scheduler half-built.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAssembler {
    parts: BTreeMap<u32, PartialCall>,
}

#[derive(Debug, Clone, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the call at its index.
    pub fn absorb(&mut self, fragment: &ToolCallFragment) {
        let part = self.parts.entry(fragment.index).or_default();
        if let Some(ref id) = fragment.id {
            part.id = id.clone();
        }
        if let Some(ref name) = fragment.name {
            part.name = name.clone();
        }
        if let Some(ref args) = fragment.arguments {
            part.arguments.push_str(args);
        }
    }

    /// Whether any fragments have been observed.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Finish the stream: return completed calls in index order.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut calls = Vec::with_capacity(self.parts.len());
        for (index, part) in self.parts {
            if part.id.is_empty() || part.name.is_empty() || part.arguments.is_empty() {
                warn!(
                    index,
                    id = %part.id,
                    name = %part.name,
                    "dropping incomplete tool call fragment at stream end"
                );
                continue;
            }
            let arguments: serde_json::Value =
                serde_json::from_str(&part.arguments).unwrap_or_default();
            calls.push(ToolCall {
                id: part.id,
                name: part.name,
                arguments,
            });
        }
        calls
    }
}
