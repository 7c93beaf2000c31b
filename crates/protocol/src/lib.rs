//! # Ironloop Protocol
//!
//! Message shaping between the engine's role-based chat model and the two
//! wire dialects providers actually speak:
//!
//! - [`chat`]: role-preserving normalization for OpenAI-style APIs
//!   (discrete roles, consecutive same-role turns merged).
//! - [`blocks`]: content-block conversion for Anthropic-style APIs
//!   (system side channel, `tool_use`/`tool_result` blocks, strict
//!   user/assistant alternation).
//! - [`stream`]: reconciliation of incremental vs. cumulative streaming
//!   text and reassembly of fragmented tool calls.

pub mod blocks;
pub mod chat;
pub mod stream;

pub use blocks::{BlockConversation, BlockMessage, BlockRole, ContentBlock};
pub use stream::{DeltaTracker, ToolCallAssembler};
