//! The autonomous workflow loop.
//!
//! One [`WorkflowEngine`] drives runs against injected collaborators. Each
//! run owns a [`WorkflowRun`] state struct and iterates through model call,
//! marker resolution, and optional tiered tool execution until a terminal
//! condition is reached. Tool failures never abort a run; they fold back
//! into the conversation as adaptive guidance. Stalls while tracked work
//! remains are answered with escalating continuation directives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ironloop_config::EngineConfig;
use ironloop_core::task::{self, TaskStore};
use ironloop_core::{
    CompletionReason, Compactor, EngineEvent, Error, EventBus, HeuristicEstimator,
    IterationRecord, MarkerFlags, Message, ProviderClient, ProviderError, ProviderRequest,
    ResponseStatus, TokenEstimator, ToolCall, ToolExecution, ToolExecutor, WorkflowResult,
    WorkflowRun,
};
use ironloop_protocol::chat;
use ironloop_protocol::stream::{DeltaTracker, ToolCallAssembler};
use ironloop_scheduler::ToolScheduler;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::budget::BudgetController;
use crate::continuation;
use crate::marker;
use crate::retry::RetryPolicy;

/// Synthetic user turn injected when the model signals continue without
/// calling any tool.
const CONTINUE_PROMPT: &str = "Continue with the next step.";

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// What one model call produced, after any stream reassembly.
struct TurnOutput {
    content: String,
    tool_calls: Vec<ToolCall>,
    session_marker: Option<String>,
}

/// The workflow engine. Cheap to clone; clones share collaborators and the
/// cancellation token.
#[derive(Clone)]
pub struct WorkflowEngine {
    provider: Arc<dyn ProviderClient>,
    executor: Arc<dyn ToolExecutor>,
    tasks: Option<Arc<dyn TaskStore>>,
    compactor: Option<Arc<dyn Compactor>>,
    estimator: Arc<dyn TokenEstimator>,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        executor: Arc<dyn ToolExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            tasks: None,
            compactor: None,
            estimator: Arc::new(HeuristicEstimator),
            event_bus: None,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Attach a task store. Without one the stop override and
    /// auto-continuation never engage, since both are gated on tracked
    /// incomplete work.
    pub fn with_task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Attach a compactor; enables budget-driven conversation compaction.
    pub fn with_compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Replace the default character-heuristic token estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Re-publish lifecycle events (everything except text deltas) to a
    /// broadcast bus for out-of-band observers.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Use an externally owned cancellation token. Cancelling it stops the
    /// run at the next checkpoint; tools already dispatched finish first.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Drive a task to completion and return the final result.
    pub async fn run(&self, task: &str) -> Result<WorkflowResult, Error> {
        self.run_inner(task, None).await
    }

    /// Drive a task while streaming the full ordered event sequence.
    ///
    /// The channel yields content deltas, tool-status transitions, and
    /// lifecycle events as they happen, terminated by `Done` on success or
    /// `Error` if the run could not produce a result.
    pub async fn run_stream(&self, task: &str) -> Result<mpsc::Receiver<EngineEvent>, Error> {
        self.check_setup(task)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        let task = task.to_string();

        tokio::spawn(async move {
            match engine.run_inner(&task, Some(tx.clone())).await {
                Ok(result) => {
                    let _ = tx.send(EngineEvent::Done { result }).await;
                }
                Err(err) => {
                    let _ = tx
                        .send(EngineEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        });

        Ok(rx)
    }

    fn check_setup(&self, task: &str) -> Result<(), Error> {
        if task.trim().is_empty() {
            return Err(Error::Setup("task must not be empty".into()));
        }
        if self.config.max_iterations == 0 {
            return Err(Error::Setup("max_iterations must be at least 1".into()));
        }
        Ok(())
    }

    async fn run_inner(
        &self,
        task: &str,
        events: Option<mpsc::Sender<EngineEvent>>,
    ) -> Result<WorkflowResult, Error> {
        self.check_setup(task)?;

        let mut run = WorkflowRun::new(task, self.config.max_iterations);
        let mut errors: Vec<String> = Vec::new();
        let scheduler = ToolScheduler::new(Arc::clone(&self.executor));
        let retry = RetryPolicy::from_config(&self.config.retry);
        let mut budget =
            BudgetController::new(Arc::clone(&self.estimator), self.config.budget.clone());
        if let Some(compactor) = &self.compactor {
            budget = budget.with_compactor(Arc::clone(compactor));
        }
        let tool_definitions = self.executor.definitions();

        info!(
            model = %self.config.model,
            max_iterations = run.max_iterations,
            provider = self.provider.name(),
            "workflow run starting"
        );
        self.emit(
            &events,
            EngineEvent::RunStarted {
                model: self.config.model.clone(),
                max_iterations: run.max_iterations,
            },
        )
        .await;

        while run.should_continue {
            if self.cancel.is_cancelled() {
                run.finish(CompletionReason::Cancelled);
                break;
            }
            if run.iteration >= run.max_iterations {
                info!(iterations = run.iteration, "iteration budget exhausted");
                run.finish(CompletionReason::MaxIterationsReached);
                break;
            }

            let iteration = run.iteration;
            let started_at = Utc::now();
            let timer = Instant::now();
            run.begin_iteration();

            // Budget check runs against the durable conversation so a
            // compaction survives into later iterations.
            match budget
                .enforce(
                    &mut run.persistent_messages,
                    &tool_definitions,
                    &self.config.model,
                )
                .await
            {
                Ok(outcome) if outcome.compacted => {
                    // The provider-side session no longer matches the
                    // compacted conversation.
                    run.session_marker = None;
                    self.emit(
                        &events,
                        EngineEvent::CompactionPerformed {
                            before_tokens: outcome.before_tokens,
                            after_tokens: outcome.after_tokens,
                        },
                    )
                    .await;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(iteration, error = %err, "compaction failed, continuing uncompacted");
                    errors.push(format!("compaction failed: {err}"));
                }
            }

            let request = ProviderRequest {
                model: self.config.model.clone(),
                messages: chat::normalize(&run.request_messages()),
                temperature: self.config.temperature,
                max_tokens: Some(self.config.max_tokens),
                tools: tool_definitions.clone(),
                stream: events.is_some(),
                session_marker: run.session_marker.clone(),
            };

            let turn = match self.call_model(&retry, request, &events).await {
                Ok(turn) => turn,
                Err(ProviderError::ContentFilter(reason)) => {
                    // Rejections become turn content so the run can wind
                    // down gracefully instead of discarding its progress.
                    warn!(iteration, "provider content filter rejected the request");
                    TurnOutput {
                        content: format!(
                            "The provider declined to generate a response \
                             (content filter): {reason}. Rephrase the request \
                             or stop."
                        ),
                        tool_calls: Vec::new(),
                        session_marker: run.session_marker.clone(),
                    }
                }
                Err(err) => {
                    if iteration == 0 {
                        return Err(Error::Provider(err));
                    }
                    let message = friendly_provider_error(&err);
                    warn!(iteration, error = %err, "provider call failed, ending run with partial results");
                    errors.push(message.clone());
                    self.emit(&events, EngineEvent::Error { message }).await;
                    run.push_record(IterationRecord {
                        iteration,
                        tool_calls: Vec::new(),
                        tool_results: HashMap::new(),
                        raw_text: String::new(),
                        filtered_text: String::new(),
                        markers: MarkerFlags::default(),
                        started_at,
                        duration_ms: timer.elapsed().as_millis() as u64,
                        response_status: ResponseStatus::Error,
                    });
                    self.emit(
                        &events,
                        EngineEvent::IterationCompleted {
                            iteration,
                            status: ResponseStatus::Error,
                        },
                    )
                    .await;
                    run.finish(CompletionReason::Error);
                    break;
                }
            };

            if turn.session_marker.is_some() {
                run.session_marker = turn.session_marker.clone();
            }

            // Markers resolve against raw output; storage gets the
            // filtered text.
            let flags = marker::detect(&turn.content);
            if let Some(pattern) = &flags.matched_pattern {
                debug!(iteration, pattern = %pattern, "control marker detected");
                self.emit(
                    &events,
                    EngineEvent::MarkerDetected {
                        pattern: pattern.clone(),
                    },
                )
                .await;
            }
            let filtered = marker::filter(&turn.content);

            run.persistent_messages.push(Message::assistant_with_tools(
                filtered.clone(),
                turn.tool_calls.iter().map(Into::into).collect(),
            ));

            let tasks = match &self.tasks {
                Some(store) => store.read_tasks().await,
                None => Vec::new(),
            };
            let next_task = task::first_incomplete(&tasks);

            // A stop signal is overridden while tracked work remains.
            let mut resolved = flags.clone();
            if resolved.stop && next_task.is_some() {
                info!(iteration, "stop marker overridden, tracked tasks remain incomplete");
                resolved.stop = false;
                resolved.should_continue = true;
            }

            let (status, tool_results, terminal) = if self.cancel.is_cancelled() {
                (
                    ResponseStatus::Success,
                    HashMap::new(),
                    Some(CompletionReason::Cancelled),
                )
            } else if resolved.complete {
                // Complete wins immediately, even over requested tool calls.
                (
                    ResponseStatus::WorkflowComplete,
                    HashMap::new(),
                    Some(CompletionReason::WorkflowComplete),
                )
            } else if !turn.tool_calls.is_empty() {
                for call in &turn.tool_calls {
                    self.emit(
                        &events,
                        EngineEvent::ToolCallObserved {
                            id: call.id.clone(),
                            name: call.name.clone(),
                        },
                    )
                    .await;
                }

                let executions = self
                    .execute_tools(&scheduler, &turn.tool_calls, iteration, &events)
                    .await;

                let mut results = HashMap::with_capacity(executions.len());
                for execution in executions {
                    let guidance = if execution.success {
                        run.failures.record_success(&execution.tool_name);
                        None
                    } else {
                        let streak = run.failures.record_failure(
                            &execution.tool_name,
                            iteration,
                            self.config.continuation.failure_window,
                        );
                        continuation::failure_guidance(streak, &execution.tool_name)
                    };
                    let mut text = execution.result.clone();
                    if let Some(guidance) = guidance {
                        text.push_str("\n\n");
                        text.push_str(&guidance);
                    }
                    run.persistent_messages
                        .push(Message::tool_result(execution.tool_call_id.clone(), text));
                    results.insert(execution.tool_call_id.clone(), execution);
                }

                if continuation::any_work_tool(
                    &turn.tool_calls,
                    &self.config.continuation.planning_tools,
                ) {
                    run.note_work_progress();
                } else {
                    run.note_planning_stall();
                }

                // A cancellation that arrived mid-batch lets dispatched
                // calls finish but ends the run here.
                let terminal = self
                    .cancel
                    .is_cancelled()
                    .then_some(CompletionReason::Cancelled);
                (ResponseStatus::Success, results, terminal)
            } else {
                run.note_planning_stall();

                if resolved.stop {
                    (
                        ResponseStatus::NaturalCompletion,
                        HashMap::new(),
                        Some(CompletionReason::Stopped),
                    )
                } else if resolved.should_continue {
                    run.defer_message(CONTINUE_PROMPT);
                    (ResponseStatus::ContinueSignal, HashMap::new(), None)
                } else if next_task.is_some()
                    && run.auto_continue_attempts < self.config.continuation.retry_limit
                {
                    let level = escalation_level(run.effective_escalation());
                    run.defer_message(continuation::directive(level, next_task));
                    run.auto_continue_attempts += 1;
                    if self.config.workflow_mode {
                        run.remove_last_assistant_turn();
                    }
                    info!(iteration, level, "injecting continuation directive");
                    self.emit(
                        &events,
                        EngineEvent::InterventionInjected { level: level as u8 },
                    )
                    .await;
                    (ResponseStatus::AutoContinueInjected, HashMap::new(), None)
                } else {
                    (
                        ResponseStatus::NaturalCompletion,
                        HashMap::new(),
                        Some(CompletionReason::NaturalCompletion),
                    )
                }
            };

            run.push_record(IterationRecord {
                iteration,
                tool_calls: turn.tool_calls.clone(),
                tool_results,
                raw_text: turn.content.clone(),
                filtered_text: filtered,
                markers: resolved,
                started_at,
                duration_ms: timer.elapsed().as_millis() as u64,
                response_status: status,
            });
            self.emit(&events, EngineEvent::IterationCompleted { iteration, status })
                .await;

            if let Some(reason) = terminal {
                run.finish(reason);
            }
        }

        let result = run.into_result(errors);
        info!(
            reason = ?result.completion_reason,
            iterations = result.iterations_used,
            "workflow run finished"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(EngineEvent::Done {
                result: result.clone(),
            });
        }
        Ok(result)
    }

    /// One model call through the retry policy, with a per-attempt timeout.
    /// Streaming responses are reassembled into a single [`TurnOutput`],
    /// forwarding reconciled deltas as they arrive.
    async fn call_model(
        &self,
        retry: &RetryPolicy,
        request: ProviderRequest,
        events: &Option<mpsc::Sender<EngineEvent>>,
    ) -> Result<TurnOutput, ProviderError> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let observer = |attempt: u32, delay: Duration, err: &ProviderError| {
            debug!(attempt, error = %err, "provider retry scheduled");
            let event = EngineEvent::RetryScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            };
            if let Some(bus) = &self.event_bus {
                bus.publish(event.clone());
            }
            if let Some(tx) = events {
                let _ = tx.try_send(event);
            }
        };

        if request.stream {
            let mut rx = retry
                .execute_observed(
                    || {
                        let request = request.clone();
                        async move {
                            match tokio::time::timeout(timeout, self.provider.stream(request))
                                .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(timeout_error(timeout)),
                            }
                        }
                    },
                    observer,
                )
                .await?;

            let mut tracker = DeltaTracker::new(self.provider.delta_mode());
            let mut assembler = ToolCallAssembler::new();
            let mut session_marker = None;

            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                if let Some(text) = &chunk.content {
                    if let Some(delta) = tracker.apply(text) {
                        if !delta.is_empty() {
                            self.emit(events, EngineEvent::Delta { content: delta })
                                .await;
                        }
                    }
                }
                for fragment in &chunk.tool_calls {
                    assembler.absorb(fragment);
                }
                if chunk.session_marker.is_some() {
                    session_marker = chunk.session_marker;
                }
                if chunk.done {
                    break;
                }
            }

            Ok(TurnOutput {
                content: tracker.full_text().to_string(),
                tool_calls: assembler.finish(),
                session_marker,
            })
        } else {
            let response = retry
                .execute_observed(
                    || {
                        let request = request.clone();
                        async move {
                            match tokio::time::timeout(timeout, self.provider.send(request)).await
                            {
                                Ok(result) => result,
                                Err(_) => Err(timeout_error(timeout)),
                            }
                        }
                    },
                    observer,
                )
                .await?;

            Ok(TurnOutput {
                content: response.content,
                tool_calls: response.tool_calls,
                session_marker: response.session_marker,
            })
        }
    }

    /// Run a tool batch, forwarding the scheduler's live tool events to the
    /// streaming channel and the bus.
    async fn execute_tools(
        &self,
        scheduler: &ToolScheduler,
        calls: &[ToolCall],
        iteration: usize,
        events: &Option<mpsc::Sender<EngineEvent>>,
    ) -> Vec<ToolExecution> {
        if events.is_none() && self.event_bus.is_none() {
            return scheduler
                .execute_batch(calls, iteration, &self.cancel, None)
                .await;
        }

        let (tool_tx, mut tool_rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);
        let sink = events.clone();
        let bus = self.event_bus.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = tool_rx.recv().await {
                if let Some(bus) = &bus {
                    bus.publish(event.clone());
                }
                if let Some(tx) = &sink {
                    let _ = tx.send(event).await;
                }
            }
        });

        let executions = scheduler
            .execute_batch(calls, iteration, &self.cancel, Some(tool_tx))
            .await;
        // All senders are gone once the batch returns; drain to completion
        // so tool events land before IterationCompleted.
        let _ = forwarder.await;
        executions
    }

    /// Deliver an event to the streaming channel, re-publishing the coarse
    /// subset (everything except deltas) to the bus.
    async fn emit(&self, sink: &Option<mpsc::Sender<EngineEvent>>, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            if !matches!(event, EngineEvent::Delta { .. }) {
                bus.publish(event.clone());
            }
        }
        if let Some(tx) = sink {
            let _ = tx.send(event).await;
        }
    }
}

/// Map the raw escalation counter onto the three directive levels.
fn escalation_level(effective: u32) -> u32 {
    effective.clamp(1, 3)
}

fn friendly_provider_error(err: &ProviderError) -> String {
    if err.is_rate_limited() {
        format!(
            "service busy: the provider kept rate limiting after repeated \
             backoff ({err}); try again later or lower the request rate"
        )
    } else {
        err.to_string()
    }
}

fn timeout_error(timeout: Duration) -> ProviderError {
    ProviderError::Timeout(format!(
        "no response within {}s. If requests keep timing out, reduce the \
         payload: paginate large tool results or summarize earlier turns",
        timeout.as_secs()
    ))
}
