//! # Ironloop Scheduler
//!
//! Tiered execution of one iteration's tool calls. Every call is classified
//! by its registry profile into one of three tiers, executed with that
//! tier's concurrency discipline, and the results are returned in the
//! original request order regardless of completion timing:
//!
//! - **Blocking**: strictly one at a time, and each must fully complete
//!   before anything else (including other blocking tools) starts.
//! - **Serial**: one at a time, after all blocking tools finish.
//! - **Parallel**: concurrent fan-out, fan-in keyed by request index.
//!
//! Nothing here throws for a single bad call: unknown tools, executor
//! errors, and panicked tasks all become failed [`ToolExecution`] records so
//! the batch (and the surrounding run) always gets a full result set.

use ironloop_core::error::ToolError;
use ironloop_core::event::EngineEvent;
use ironloop_core::tool::{ToolCall, ToolExecution, ToolExecutor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Concurrency class assigned to one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTier {
    Blocking,
    Serial,
    Parallel,
}

/// Executes batches of tool calls against a [`ToolExecutor`] collaborator.
pub struct ToolScheduler {
    executor: Arc<dyn ToolExecutor>,
}

impl ToolScheduler {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }

    /// Classify a call by its registry profile.
    ///
    /// Unregistered names classify as parallel; they fail safely inside the
    /// tier with a "not found" result instead of aborting the batch.
    pub fn classify(&self, call: &ToolCall) -> ExecutionTier {
        match self.executor.lookup(&call.name) {
            Some(profile) if profile.requires_blocking => ExecutionTier::Blocking,
            Some(profile) if profile.requires_serial => ExecutionTier::Serial,
            _ => ExecutionTier::Parallel,
        }
    }

    /// Execute a batch of calls, honoring tier discipline and cooperative
    /// cancellation. Results come back in the original request order.
    ///
    /// Cancellation is checked before every blocking/serial dispatch and
    /// before the parallel fan-out: already-dispatched calls finish, calls
    /// not yet issued are recorded as cancelled failures.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        iteration: usize,
        cancel: &CancellationToken,
        events: Option<mpsc::Sender<EngineEvent>>,
    ) -> Vec<ToolExecution> {
        let mut blocking: Vec<usize> = Vec::new();
        let mut serial: Vec<usize> = Vec::new();
        let mut parallel: Vec<usize> = Vec::new();
        for (idx, call) in calls.iter().enumerate() {
            match self.classify(call) {
                ExecutionTier::Blocking => blocking.push(idx),
                ExecutionTier::Serial => serial.push(idx),
                ExecutionTier::Parallel => parallel.push(idx),
            }
        }
        debug!(
            total = calls.len(),
            blocking = blocking.len(),
            serial = serial.len(),
            parallel = parallel.len(),
            "executing tool batch"
        );

        let mut slots: Vec<Option<ToolExecution>> = vec![None; calls.len()];

        // Blocking tier, then serial tier: one call at a time, in order.
        for idx in blocking.into_iter().chain(serial) {
            let call = &calls[idx];
            if cancel.is_cancelled() {
                slots[idx] = Some(cancelled_execution(call, iteration));
                continue;
            }
            emit(&events, EngineEvent::ToolStarted {
                id: call.id.clone(),
                name: call.name.clone(),
            })
            .await;
            let execution = run_one(&self.executor, call, iteration).await;
            emit(&events, finished_event(&execution)).await;
            slots[idx] = Some(execution);
        }

        // Parallel tier: fan out, fan in, re-sort by request index.
        if cancel.is_cancelled() {
            for idx in parallel {
                slots[idx] = Some(cancelled_execution(&calls[idx], iteration));
            }
        } else if !parallel.is_empty() {
            let mut join_set: JoinSet<(usize, ToolExecution)> = JoinSet::new();
            let mut spawned: HashMap<tokio::task::Id, usize> = HashMap::new();

            for &idx in &parallel {
                let call = calls[idx].clone();
                let executor = Arc::clone(&self.executor);
                let events = events.clone();
                let handle = join_set.spawn(async move {
                    emit(&events, EngineEvent::ToolStarted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    })
                    .await;
                    let execution = run_one(&executor, &call, iteration).await;
                    emit(&events, finished_event(&execution)).await;
                    (idx, execution)
                });
                spawned.insert(handle.id(), idx);
            }

            while let Some(joined) = join_set.join_next_with_id().await {
                match joined {
                    Ok((_, (idx, execution))) => slots[idx] = Some(execution),
                    Err(join_err) => {
                        // A crashed tool task becomes a failed execution for
                        // its call, never a batch abort.
                        warn!(error = %join_err, "tool task crashed");
                        if let Some(&idx) = spawned.get(&join_err.id()) {
                            let call = &calls[idx];
                            let execution = ToolExecution::failed(
                                &call.id,
                                &call.name,
                                format!("tool task crashed: {join_err}"),
                                iteration,
                            );
                            emit(&events, finished_event(&execution)).await;
                            slots[idx] = Some(execution);
                        }
                    }
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    // Unreachable with the tiers above; keep the batch total
                    // anyway rather than panic inside the loop.
                    ToolExecution::failed(
                        &calls[idx].id,
                        &calls[idx].name,
                        "scheduler produced no result for this call",
                        iteration,
                    )
                })
            })
            .collect()
    }
}

/// Run one call to completion, converting every failure shape into a
/// failed execution record.
async fn run_one(
    executor: &Arc<dyn ToolExecutor>,
    call: &ToolCall,
    iteration: usize,
) -> ToolExecution {
    if executor.lookup(&call.name).is_none() {
        return ToolExecution::failed(
            &call.id,
            &call.name,
            ToolError::NotFound(call.name.clone()).to_string(),
            iteration,
        );
    }

    let started = Instant::now();
    match executor.execute(call).await {
        Ok(outcome) => ToolExecution {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: outcome.output,
            success: outcome.success,
            duration_ms: started.elapsed().as_millis() as u64,
            iteration,
        },
        Err(err) => ToolExecution {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: err.to_string(),
            success: false,
            duration_ms: started.elapsed().as_millis() as u64,
            iteration,
        },
    }
}

fn cancelled_execution(call: &ToolCall, iteration: usize) -> ToolExecution {
    ToolExecution::failed(
        &call.id,
        &call.name,
        "cancelled before dispatch",
        iteration,
    )
}

fn finished_event(execution: &ToolExecution) -> EngineEvent {
    EngineEvent::ToolFinished {
        id: execution.tool_call_id.clone(),
        name: execution.tool_name.clone(),
        success: execution.success,
        duration_ms: execution.duration_ms,
    }
}

async fn emit(events: &Option<mpsc::Sender<EngineEvent>>, event: EngineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
