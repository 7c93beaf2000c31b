//! Conversation compaction collaborator.
//!
//! Compaction is semantically lossy summarization and is opaque to the
//! engine: the budget controller decides *when* and *to what target*,
//! an implementation of this trait decides *how*.

use crate::error::CompactError;
use crate::message::Message;
use async_trait::async_trait;

/// The compactor collaborator.
#[async_trait]
pub trait Compactor: Send + Sync {
    /// Compress `messages` down to roughly `target_tokens`.
    ///
    /// Implementations may summarize, truncate, or drop turns; they must
    /// return a non-empty sequence that still reads as a conversation.
    async fn compact(
        &self,
        messages: Vec<Message>,
        target_tokens: usize,
    ) -> std::result::Result<Vec<Message>, CompactError>;
}
