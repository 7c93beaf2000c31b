//! Pre-flight context budget enforcement.
//!
//! Before every model call the controller estimates the outgoing request
//! and, when usage crosses the configured threshold of the model's context
//! window, hands the conversation to the compactor with a target below the
//! threshold. A content fingerprint taken before and after tells the engine
//! whether compaction actually changed anything.

use std::sync::Arc;

use ironloop_config::BudgetConfig;
use ironloop_core::provider::ToolDefinition;
use ironloop_core::{CompactError, Compactor, Message, TokenEstimator};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// What a pre-flight budget check did to the conversation.
#[derive(Debug, Clone, Copy)]
pub struct BudgetOutcome {
    /// True when compaction ran and the content fingerprint changed.
    pub compacted: bool,
    pub before_tokens: usize,
    pub after_tokens: usize,
}

pub struct BudgetController {
    estimator: Arc<dyn TokenEstimator>,
    compactor: Option<Arc<dyn Compactor>>,
    config: BudgetConfig,
}

impl BudgetController {
    pub fn new(estimator: Arc<dyn TokenEstimator>, config: BudgetConfig) -> Self {
        Self {
            estimator,
            compactor: None,
            config,
        }
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Context window for `model`, honoring the configured override.
    pub fn limit_for(&self, model: &str) -> usize {
        self.config
            .context_limit
            .unwrap_or_else(|| self.estimator.context_limit(model))
    }

    /// Check `messages` plus `tools` against the model's window and compact
    /// in place when the threshold is crossed.
    pub async fn enforce(
        &self,
        messages: &mut Vec<Message>,
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<BudgetOutcome, CompactError> {
        let limit = self.limit_for(model);
        let before_tokens =
            self.estimator.estimate_messages(messages) + self.estimator.estimate_tools(tools);
        let threshold = scale(limit, self.config.compaction_threshold);

        if before_tokens <= threshold {
            debug!(estimated = before_tokens, threshold, "within context budget");
            return Ok(BudgetOutcome {
                compacted: false,
                before_tokens,
                after_tokens: before_tokens,
            });
        }

        let Some(compactor) = &self.compactor else {
            warn!(
                estimated = before_tokens,
                limit, "over context budget with no compactor attached"
            );
            return Ok(BudgetOutcome {
                compacted: false,
                before_tokens,
                after_tokens: before_tokens,
            });
        };

        let target = scale(limit, self.config.compaction_target);
        info!(
            estimated = before_tokens,
            limit, target, "forcing conversation compaction"
        );

        let fingerprint_before = fingerprint(messages);
        let compacted = compactor.compact(messages.clone(), target).await?;
        if compacted.is_empty() {
            return Err(CompactError::Emptied);
        }

        let changed = fingerprint(&compacted) != fingerprint_before;
        let after_tokens =
            self.estimator.estimate_messages(&compacted) + self.estimator.estimate_tools(tools);
        *messages = compacted;

        Ok(BudgetOutcome {
            compacted: changed,
            before_tokens,
            after_tokens,
        })
    }
}

fn scale(limit: usize, fraction: f32) -> usize {
    (limit as f64 * f64::from(fraction)) as usize
}

/// Order-sensitive digest of message content and embedded tool calls.
fn fingerprint(messages: &[Message]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update([message.role as u8]);
        hasher.update(message.content.as_bytes());
        for call in &message.tool_calls {
            hasher.update(call.name.as_bytes());
            hasher.update(call.arguments.as_bytes());
        }
    }
    hasher.finalize().into()
}
