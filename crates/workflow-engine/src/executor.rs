//! Workflow interpreter
//!
//! Runs a prepared workflow one step at a time from its start step. Each
//! iteration dispatches the current step to its handler, applies the
//! handler's variable updates and picks the next step from the edge group.
//! The report mode and the streaming mode drive the same single-iteration
//! state machine ([`RunState::advance`]), so they always produce the same
//! event sequence.
//!
//! Steps never run in parallel, even when the graph fans out: the
//! interpreter follows the first outgoing edge.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;

use crate::cache::PreparedWorkflow;
use crate::config::{EngineConfig, FailurePolicy};
use crate::context::VariableContext;
use crate::error::{EngineError, Result};
use crate::events::{EventSink, WorkflowEvent};
use crate::handlers::{AgentInvoker, StepContext, StepRegistry};
use crate::resolver::evaluate_condition;
use crate::types::{Step, StepKind, WorkflowDefinition};

const DEFAULT_OUTPUT: &str = "Workflow completed";

/// Shared abort signal for a run
///
/// Checked at the top of every iteration; a step already executing is allowed
/// to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Status of one executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Record of one dispatched step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_id: String,
    pub kind: StepKind,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a complete run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub output: String,
    pub steps: Vec<StepRecord>,
    pub variables: HashMap<String, Value>,
    /// Steps counted against the iteration cap, including disabled ones
    pub steps_executed: u32,
    pub hit_iteration_limit: bool,
    pub execution_time_ms: u64,
}

impl ExecutionReport {
    /// Records of the steps that failed
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
    }
}

/// The interpreter
///
/// Cheap to clone: the agent and the handler registry are shared.
#[derive(Clone)]
pub struct WorkflowEngine {
    agent: Arc<dyn AgentInvoker>,
    registry: Arc<StepRegistry>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Create an engine with the built-in handlers and default config
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self {
            agent,
            registry: Arc::new(StepRegistry::builtin()),
            config: EngineConfig::default(),
        }
    }

    /// Replace the handler registry
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a workflow to completion, pushing every event into `event_sink`
    pub async fn execute(
        &self,
        workflow: &Arc<PreparedWorkflow>,
        input: &str,
        event_sink: &dyn EventSink,
    ) -> Result<ExecutionReport> {
        self.execute_with_cancel(workflow, input, event_sink, &CancellationHandle::new())
            .await
    }

    /// Run an unprepared definition
    pub async fn execute_definition(
        &self,
        definition: &WorkflowDefinition,
        input: &str,
        event_sink: &dyn EventSink,
    ) -> Result<ExecutionReport> {
        let prepared = Arc::new(PreparedWorkflow::from(definition.clone()));
        self.execute(&prepared, input, event_sink).await
    }

    /// Run a workflow with an external cancellation handle
    ///
    /// Fails only when the run cannot start; step failures are part of the
    /// report.
    pub async fn execute_with_cancel(
        &self,
        workflow: &Arc<PreparedWorkflow>,
        input: &str,
        event_sink: &dyn EventSink,
        cancel: &CancellationHandle,
    ) -> Result<ExecutionReport> {
        let mut run = RunState::start(self.clone(), workflow.clone(), input, cancel.clone())?;
        emit(event_sink, run.started_event());

        while !run.is_finished() {
            for event in run.advance().await {
                emit(event_sink, event);
            }
        }

        Ok(run.into_report())
    }

    /// Run a workflow as a stream of events
    ///
    /// Nothing executes until the stream is polled: each pull runs at most one
    /// step, and dropping the stream abandons the run. The run-level checks
    /// happen here, before the stream exists.
    pub fn execute_stream(
        &self,
        workflow: Arc<PreparedWorkflow>,
        input: impl Into<String>,
        cancel: CancellationHandle,
    ) -> Result<impl Stream<Item = WorkflowEvent> + Send + 'static> {
        let input: String = input.into();
        let run = RunState::start(self.clone(), workflow, &input, cancel)?;
        let mut pending = VecDeque::new();
        pending.push_back(run.started_event());

        Ok(stream::unfold((run, pending), |(mut run, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (run, pending)));
                }
                if run.is_finished() {
                    return None;
                }
                pending.extend(run.advance().await);
            }
        }))
    }
}

fn emit(event_sink: &dyn EventSink, event: WorkflowEvent) {
    if let Err(e) = event_sink.send(event) {
        log::warn!("Dropping workflow event: {}", e);
    }
}

/// State of one run: `(current step, variables, executed count)` plus what
/// the report needs
struct RunState {
    engine: WorkflowEngine,
    workflow: Arc<PreparedWorkflow>,
    execution_id: String,
    input: String,
    variables: VariableContext,
    current: Option<String>,
    executed: u32,
    max_iterations: u32,
    last_output: Option<String>,
    end_output: Option<String>,
    records: Vec<StepRecord>,
    status: Option<RunStatus>,
    hit_iteration_limit: bool,
    cancel: CancellationHandle,
    started_at: Instant,
}

impl RunState {
    /// Check that the run can start and seed its state
    fn start(
        engine: WorkflowEngine,
        workflow: Arc<PreparedWorkflow>,
        input: &str,
        cancel: CancellationHandle,
    ) -> Result<Self> {
        let definition = workflow.definition();
        if definition.start_step_id.is_empty() {
            return Err(EngineError::not_found(format!(
                "Workflow '{}' has no start step",
                definition.id
            )));
        }
        let start = workflow.step(&definition.start_step_id).ok_or_else(|| {
            EngineError::not_found(format!(
                "Start step '{}' in workflow '{}'",
                definition.start_step_id, definition.id
            ))
        })?;
        if start.disabled {
            return Err(EngineError::InvalidState(format!(
                "Start step '{}' is disabled",
                start.id
            )));
        }

        let variables =
            VariableContext::seeded(definition, &engine.config.input_variable, input);
        let max_iterations =
            definition.effective_max_iterations(engine.config.default_max_iterations);
        let current = Some(definition.start_step_id.clone());
        let execution_id = format!("exec-{}", uuid::Uuid::new_v4());

        log::info!(
            "Starting workflow '{}' ({}), max {} steps",
            definition.id,
            execution_id,
            max_iterations
        );

        Ok(Self {
            engine,
            workflow,
            execution_id,
            input: input.to_string(),
            variables,
            current,
            executed: 0,
            max_iterations,
            last_output: None,
            end_output: None,
            records: Vec::new(),
            status: None,
            hit_iteration_limit: false,
            cancel,
            started_at: Instant::now(),
        })
    }

    fn started_event(&self) -> WorkflowEvent {
        WorkflowEvent::workflow_started(&self.workflow.definition().id, &self.execution_id)
    }

    fn is_finished(&self) -> bool {
        self.status.is_some()
    }

    /// Run one iteration and return the events it produced
    ///
    /// A disabled step produces no events but still counts as executed.
    async fn advance(&mut self) -> Vec<WorkflowEvent> {
        if self.is_finished() {
            return Vec::new();
        }

        if self.cancel.is_cancelled() {
            log::info!("Workflow run {} cancelled", self.execution_id);
            self.status = Some(RunStatus::Cancelled);
            return if self.engine.config.emit_cancellation_notice {
                vec![WorkflowEvent::workflow_cancelled()]
            } else {
                Vec::new()
            };
        }

        let Some(step_id) = self.current.clone() else {
            return self.complete();
        };

        if self.executed >= self.max_iterations {
            log::warn!(
                "Workflow run {} reached its limit of {} steps",
                self.execution_id,
                self.max_iterations
            );
            self.hit_iteration_limit = true;
            return self.complete();
        }

        let workflow = self.workflow.clone();
        let Some(step) = workflow.step(&step_id) else {
            log::warn!("Step '{}' not found, ending run", step_id);
            return self.complete();
        };

        self.executed += 1;

        if step.disabled {
            log::debug!("Skipping disabled step '{}'", step.id);
            self.current = workflow
                .outgoing_edges(&step.id)
                .first()
                .map(|e| e.target_step_id.clone());
            return Vec::new();
        }

        log::debug!("Executing step '{}' ({})", step.id, step.kind);
        let mut events = vec![WorkflowEvent::step_started(step)];

        let handler = self.engine.registry.handler_for(&step.kind);
        let result = {
            let ctx = StepContext {
                variables: &self.variables,
                input: &self.input,
                agent: self.engine.agent.as_ref(),
            };
            handler.execute(step, &ctx).await
        };

        match result {
            Ok(outcome) => {
                self.variables.apply(outcome.updates);
                if outcome.output.is_some() {
                    self.last_output = outcome.output.clone();
                }
                events.push(WorkflowEvent::step_completed(step, outcome.output.as_deref()));
                self.records.push(StepRecord {
                    step_id: step.id.clone(),
                    kind: step.kind.clone(),
                    status: StepStatus::Completed,
                    output: outcome.output.clone(),
                    error: None,
                });

                if outcome.terminate {
                    self.end_output = outcome.output;
                    events.extend(self.complete());
                    return events;
                }
            }
            Err(e) => {
                let error = e.to_string();
                log::warn!("Step '{}' failed: {}", step.id, error);
                events.push(WorkflowEvent::step_failed(step, &error));
                self.records.push(StepRecord {
                    step_id: step.id.clone(),
                    kind: step.kind.clone(),
                    status: StepStatus::Failed,
                    output: None,
                    error: Some(error.clone()),
                });

                if self.engine.config.failure_policy == FailurePolicy::Abort {
                    self.status = Some(RunStatus::Failed);
                    events.push(WorkflowEvent::workflow_failed(&format!(
                        "Step '{}' failed: {}",
                        step.id, error
                    )));
                    return events;
                }
            }
        }

        self.current = self.next_step(step);
        events
    }

    /// Pick the successor of a step that just ran
    fn next_step(&self, step: &Step) -> Option<String> {
        let edges = self.workflow.outgoing_edges(&step.id);
        match step.kind {
            StepKind::Goto => step
                .config_str("targetStepId")
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            StepKind::ConditionGroup if edges.len() > 1 => {
                let vars = self.variables.data();
                let matched = edges.iter().find(|edge| match edge.condition_expr() {
                    None => true,
                    Some(expr) => evaluate_condition(expr, vars),
                });
                if let Some(edge) = matched {
                    return Some(edge.target_step_id.clone());
                }
                self.workflow
                    .edge_group(&step.id)
                    .and_then(|g| g.default_target_step_id.clone())
                    .or_else(|| {
                        step.config_str("defaultTargetStepId")
                            .filter(|t| !t.is_empty())
                            .map(str::to_string)
                    })
            }
            _ => edges.first().map(|e| e.target_step_id.clone()),
        }
    }

    fn final_output(&self) -> String {
        self.end_output
            .clone()
            .or_else(|| self.last_output.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT.to_string())
    }

    fn complete(&mut self) -> Vec<WorkflowEvent> {
        self.status = Some(RunStatus::Completed);
        let output = self.final_output();
        log::info!(
            "Workflow run {} completed after {} steps",
            self.execution_id,
            self.executed
        );
        vec![WorkflowEvent::workflow_completed(&output, self.executed)]
    }

    fn into_report(self) -> ExecutionReport {
        let output = self.final_output();
        ExecutionReport {
            execution_id: self.execution_id,
            workflow_id: self.workflow.definition().id.clone(),
            status: self.status.unwrap_or(RunStatus::Completed),
            output,
            steps: self.records,
            variables: self.variables.into_data(),
            steps_executed: self.executed,
            hit_iteration_limit: self.hit_iteration_limit,
            execution_time_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}
