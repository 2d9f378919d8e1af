//! Per-kind step behavior
//!
//! Each step kind maps to a [`StepHandler`] in a [`StepRegistry`]. A handler
//! reads the step's config and the current variables, and returns a
//! [`StepOutcome`]: optional output text, variable updates, and whether the
//! run should end. Handlers never touch the variable context directly; the
//! interpreter applies the updates after the handler returns.
//!
//! Kinds with no registered handler fall through to a permissive generic
//! handler rather than failing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::VariableContext;
use crate::error::{EngineError, Result};
use crate::resolver::{resolve, resolve_value};
use crate::types::{Step, StepKind};

/// The external agent capability
///
/// The engine only knows how to ask for a completion; which model answers,
/// and how, is up to the implementation.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Produce a reply for `user_message` under `system_prompt`
    async fn invoke(&self, system_prompt: &str, user_message: &str) -> Result<String>;
}

/// What a handler can see while executing one step
pub struct StepContext<'a> {
    pub variables: &'a VariableContext,
    /// The external input the run was started with
    pub input: &'a str,
    pub agent: &'a dyn AgentInvoker,
}

impl StepContext<'_> {
    fn resolve(&self, template: &str) -> String {
        resolve(template, self.variables.data())
    }

    fn resolve_config(&self, step: &Step, key: &str) -> Option<String> {
        step.config_str(key).map(|t| self.resolve(t))
    }
}

/// Result of executing one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Text produced by the step, if any
    pub output: Option<String>,
    /// Variables to write after the step
    pub updates: HashMap<String, Value>,
    /// End the run after this step
    pub terminate: bool,
}

impl StepOutcome {
    /// An outcome with no output
    pub fn none() -> Self {
        Self::default()
    }

    /// An outcome with output text; blank text counts as no output
    pub fn output(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            output: (!text.is_empty()).then_some(text),
            ..Self::default()
        }
    }

    /// Add a single variable update.
    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates.insert(key.into(), value);
        self
    }

    /// Add variable updates.
    pub fn with_updates(mut self, updates: HashMap<String, Value>) -> Self {
        self.updates.extend(updates);
        self
    }

    /// Mark the run as finished after this step
    pub fn terminating(mut self) -> Self {
        self.terminate = true;
        self
    }
}

/// Behavior for one step kind
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome>;
}

type SyncStepFn = dyn Fn(&Step, &StepContext<'_>) -> Result<StepOutcome> + Send + Sync;

/// Handler backed by a plain function
struct FnStepHandler {
    func: Box<SyncStepFn>,
}

#[async_trait]
impl StepHandler for FnStepHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        (self.func)(step, ctx)
    }
}

/// Registry mapping step kinds to handlers
pub struct StepRegistry {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
    fallback: Arc<dyn StepHandler>,
}

impl StepRegistry {
    /// Create a registry where every kind uses the generic handler
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(GenericHandler),
        }
    }

    /// Create a registry with every built-in kind registered
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(StepKind::SetVariable, Arc::new(SetVariableHandler));
        registry.register(StepKind::SendMessage, Arc::new(SendMessageHandler));
        registry.register(StepKind::AskQuestion, Arc::new(AskQuestionHandler));
        registry.register(StepKind::AgentInvoke, Arc::new(AgentInvokeHandler));
        registry.register(StepKind::ConditionGroup, Arc::new(ConditionGroupHandler));
        registry.register(StepKind::ForEach, Arc::new(ForEachHandler));
        registry.register(StepKind::Goto, Arc::new(GotoHandler));
        registry.register(StepKind::EndWorkflow, Arc::new(EndWorkflowHandler));
        registry.register(StepKind::EndConversation, Arc::new(EndConversationHandler));
        registry.register(StepKind::CreateConversation, Arc::new(CreateConversationHandler));
        registry.register(StepKind::DeleteConversation, Arc::new(DeleteConversationHandler));
        registry.register(StepKind::CopyMessages, Arc::new(CopyMessagesHandler));
        registry
    }

    /// Register or replace the handler for a kind
    pub fn register(&mut self, kind: StepKind, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Register a synchronous function as the handler for a kind
    pub fn register_fn<F>(&mut self, kind: StepKind, func: F)
    where
        F: Fn(&Step, &StepContext<'_>) -> Result<StepOutcome> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(FnStepHandler { func: Box::new(func) }));
    }

    /// Whether a kind has its own handler
    pub fn has_handler(&self, kind: &StepKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Handler for a kind, or the generic fallback
    pub fn handler_for(&self, kind: &StepKind) -> Arc<dyn StepHandler> {
        self.handlers
            .get(kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Kinds with registered handlers
    pub fn kinds(&self) -> Vec<&StepKind> {
        self.handlers.keys().collect()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// =============================================================================
// Built-in handlers
// =============================================================================

struct SetVariableHandler;

#[async_trait]
impl StepHandler for SetVariableHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let name = step
            .config_str("variableName")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| EngineError::invalid_config(&step.id, "missing 'variableName'"))?;
        let value = step
            .config
            .get("value")
            .map(|v| resolve_value(v, ctx.variables.data()))
            .unwrap_or(Value::Null);
        Ok(StepOutcome::none().with_update(name, value))
    }
}

struct SendMessageHandler;

#[async_trait]
impl StepHandler for SendMessageHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let message = ctx.resolve_config(step, "message").unwrap_or_default();
        Ok(StepOutcome::output(message))
    }
}

/// Prompts are emitted, not awaited: the run input stands in for the answer.
struct AskQuestionHandler;

#[async_trait]
impl StepHandler for AskQuestionHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let prompt = ctx.resolve_config(step, "prompt").unwrap_or_default();
        let outcome = StepOutcome::output(prompt);
        Ok(match step.config_str("resultVariable").filter(|v| !v.is_empty()) {
            Some(variable) => outcome.with_update(variable, Value::String(ctx.input.to_string())),
            None => outcome,
        })
    }
}

struct AgentInvokeHandler;

#[async_trait]
impl StepHandler for AgentInvokeHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let instructions = ctx
            .resolve_config(step, "instructionsTemplate")
            .unwrap_or_default();
        let user_message = ctx
            .resolve_config(step, "userInputTemplate")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| ctx.input.to_string());

        log::debug!(
            "Invoking agent for step '{}' ({} chars of instructions)",
            step.id,
            instructions.len()
        );
        let response = ctx.agent.invoke(&instructions, &user_message).await?;

        Ok(StepOutcome::output(response.clone())
            .with_update("agent_response", Value::String(response.clone()))
            .with_update("result", Value::String(response)))
    }
}

struct ConditionGroupHandler;

#[async_trait]
impl StepHandler for ConditionGroupHandler {
    async fn execute(&self, step: &Step, _ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let count = step
            .config
            .get("conditions")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        Ok(StepOutcome::output(format!(
            "Evaluating condition group '{}' ({} conditions)",
            step.display_name(),
            count
        )))
    }
}

struct ForEachHandler;

#[async_trait]
impl StepHandler for ForEachHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let items = ctx.resolve_config(step, "items").unwrap_or_default();
        Ok(StepOutcome::output(format!("Iterating over {}", items)))
    }
}

struct GotoHandler;

#[async_trait]
impl StepHandler for GotoHandler {
    async fn execute(&self, _step: &Step, _ctx: &StepContext<'_>) -> Result<StepOutcome> {
        Ok(StepOutcome::none())
    }
}

struct EndWorkflowHandler;

#[async_trait]
impl StepHandler for EndWorkflowHandler {
    async fn execute(&self, _step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let output = ctx
            .variables
            .get_text("result")
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Workflow completed".to_string());
        Ok(StepOutcome::output(output).terminating())
    }
}

struct EndConversationHandler;

#[async_trait]
impl StepHandler for EndConversationHandler {
    async fn execute(&self, _step: &Step, _ctx: &StepContext<'_>) -> Result<StepOutcome> {
        Ok(StepOutcome::output("Conversation ended").terminating())
    }
}

struct CreateConversationHandler;

#[async_trait]
impl StepHandler for CreateConversationHandler {
    async fn execute(&self, step: &Step, _ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let conversation_id = uuid::Uuid::new_v4().to_string();
        let outcome = StepOutcome::output(format!("Created conversation {}", conversation_id));
        Ok(
            match step.config_str("conversationIdVariable").filter(|v| !v.is_empty()) {
                Some(variable) => outcome.with_update(variable, Value::String(conversation_id)),
                None => outcome,
            },
        )
    }
}

struct DeleteConversationHandler;

#[async_trait]
impl StepHandler for DeleteConversationHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let conversation = ctx.resolve_config(step, "conversationId").unwrap_or_default();
        Ok(StepOutcome::output(format!("Deleted conversation {}", conversation)))
    }
}

struct CopyMessagesHandler;

#[async_trait]
impl StepHandler for CopyMessagesHandler {
    async fn execute(&self, step: &Step, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let target = ctx
            .resolve_config(step, "targetConversationId")
            .unwrap_or_default();
        Ok(StepOutcome::output(format!(
            "Copied messages to conversation {}",
            target
        )))
    }
}

/// Permissive handler for kinds without behavior of their own
struct GenericHandler;

#[async_trait]
impl StepHandler for GenericHandler {
    async fn execute(&self, step: &Step, _ctx: &StepContext<'_>) -> Result<StepOutcome> {
        log::debug!("No handler for kind '{}' on step '{}'", step.kind, step.id);
        Ok(StepOutcome::output("completed"))
    }
}
