//! Core types for workflow graphs
//!
//! A workflow is an ordered list of typed steps, at most one outgoing edge
//! group per source step, and a set of declared variables. The definition is
//! plain data: the executor only ever reads it, and every mutation goes
//! through the helpers below so `updated_at` stays accurate.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

/// Unique identifier for a step
pub type StepId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for an edge group
pub type EdgeGroupId = String;

/// Kind-specific key/value payload of a step
pub type StepConfig = Map<String, Value>;

/// Iteration cap used when a definition does not declare one
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// The kind of a step
///
/// Serialized as a kebab-case string. Kinds this crate does not know are kept
/// verbatim in `Custom` so that nothing is lost on a round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    /// Call the external agent capability
    AgentInvoke,
    /// Emit a message to the user
    SendMessage,
    /// Assign a variable from a template
    SetVariable,
    /// Ask the user a question and capture the answer
    AskQuestion,
    /// Branch on an ordered list of conditions
    ConditionGroup,
    /// Iterate over a collection
    ForEach,
    /// Jump to an explicit step
    Goto,
    /// Finish the workflow
    EndWorkflow,
    /// Finish the conversation
    EndConversation,
    /// Start a new conversation
    CreateConversation,
    /// Delete a conversation
    DeleteConversation,
    /// Copy messages between conversations
    CopyMessages,
    /// Any other kind, passed through untouched
    Custom(String),
}

impl StepKind {
    /// Every kind with built-in behavior
    pub const BUILTIN: [StepKind; 12] = [
        StepKind::AgentInvoke,
        StepKind::SendMessage,
        StepKind::SetVariable,
        StepKind::AskQuestion,
        StepKind::ConditionGroup,
        StepKind::ForEach,
        StepKind::Goto,
        StepKind::EndWorkflow,
        StepKind::EndConversation,
        StepKind::CreateConversation,
        StepKind::DeleteConversation,
        StepKind::CopyMessages,
    ];

    /// Wire name of this kind
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::AgentInvoke => "agent-invoke",
            StepKind::SendMessage => "send-message",
            StepKind::SetVariable => "set-variable",
            StepKind::AskQuestion => "ask-question",
            StepKind::ConditionGroup => "condition-group",
            StepKind::ForEach => "for-each",
            StepKind::Goto => "goto",
            StepKind::EndWorkflow => "end-workflow",
            StepKind::EndConversation => "end-conversation",
            StepKind::CreateConversation => "create-conversation",
            StepKind::DeleteConversation => "delete-conversation",
            StepKind::CopyMessages => "copy-messages",
            StepKind::Custom(name) => name,
        }
    }

    /// Parse a wire name, falling back to `Custom`
    pub fn from_name(name: &str) -> Self {
        Self::BUILTIN
            .iter()
            .find(|kind| kind.as_str() == name)
            .cloned()
            .unwrap_or_else(|| StepKind::Custom(name.to_string()))
    }

    /// Whether reaching this kind ends the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepKind::EndWorkflow | StepKind::EndConversation)
    }

    /// Whether this kind is one of the built-in kinds
    pub fn is_builtin(&self) -> bool {
        !matches!(self, StepKind::Custom(_))
    }
}

impl From<String> for StepKind {
    fn from(name: String) -> Self {
        StepKind::from_name(&name)
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A single node in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique, stable identifier
    pub id: StepId,
    /// Behavior of this step
    pub kind: StepKind,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Layout hint for the visual editor (x, y). Never read by the executor.
    #[serde(default)]
    pub position: (f64, f64),
    /// Kind-specific configuration
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: StepConfig,
    /// Disabled steps are passed over at run time
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
}

impl Step {
    /// Create a step with an empty config
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: String::new(),
            description: String::new(),
            position: (0.0, 0.0),
            config: StepConfig::new(),
            disabled: false,
        }
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the config
    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a single config key
    pub fn with_config_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Read a config key as a string
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Name if set, otherwise the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// How the edges of a group relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EdgeGroupType {
    /// One unconditional successor
    #[default]
    Single,
    /// Several unconditional successors
    FanOut,
    /// Joins into a shared successor
    FanIn,
    /// Ordered, first-match-wins conditional successors
    SwitchCase,
}

impl EdgeGroupType {
    /// Infer the group type from its edges
    ///
    /// Any condition makes it a switch; otherwise more than one edge is a
    /// fan-out and anything else is single.
    pub fn infer(edges: &[Edge]) -> Self {
        if edges.iter().any(Edge::has_condition) {
            EdgeGroupType::SwitchCase
        } else if edges.len() > 1 {
            EdgeGroupType::FanOut
        } else {
            EdgeGroupType::Single
        }
    }
}

/// An outgoing edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Target step
    pub target_step_id: StepId,
    /// Optional guard expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Optional label for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Create an unconditional edge
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_step_id: target.into(),
            condition: None,
            label: None,
        }
    }

    /// Set the guard expression
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Guard expression, treating blank as absent
    pub fn condition_expr(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }

    /// Whether the edge carries a non-blank guard
    pub fn has_condition(&self) -> bool {
        self.condition_expr().is_some()
    }
}

/// The set of outgoing edges owned by one source step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeGroup {
    /// Unique identifier for this group
    pub id: EdgeGroupId,
    /// Relationship between the edges
    #[serde(rename = "type", default)]
    pub group_type: EdgeGroupType,
    /// The step that owns this group
    pub source_step_id: StepId,
    /// Edges in declaration order
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Fallback when no switch edge matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_target_step_id: Option<StepId>,
}

impl EdgeGroup {
    /// Create an empty single group for a source step
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group_type: EdgeGroupType::Single,
            source_step_id: source.into(),
            edges: Vec::new(),
            default_target_step_id: None,
        }
    }
}

/// Declared type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Advisory lifetime of a variable; the executor does not enforce it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    #[default]
    Workflow,
    Conversation,
    Global,
}

/// A declared workflow variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Unique name within the workflow
    pub name: String,
    /// Declared type
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    /// Declared scope
    #[serde(default)]
    pub scope: VariableScope,
    /// Value seeded at run start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Variable {
    /// Create a workflow-scoped variable without a default
    pub fn new(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            scope: VariableScope::Workflow,
            default: None,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the scope
    pub fn with_scope(mut self, scope: VariableScope) -> Self {
        self.scope = scope;
        self
    }
}

/// An edge seen from its target
#[derive(Debug, Clone, Copy)]
pub struct IncomingEdge<'a> {
    pub source_step_id: &'a str,
    pub edge: &'a Edge,
}

/// Aggregate root of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entry point of every run
    #[serde(default)]
    pub start_step_id: StepId,
    /// Safety bound on executed steps (100 when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub edge_groups: Vec<EdgeGroup>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// JSON-schema-like description of the external input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// JSON-schema-like description of the final output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Create a new empty workflow
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            start_step_id: String::new(),
            max_iterations: None,
            steps: Vec::new(),
            edge_groups: Vec::new(),
            variables: Vec::new(),
            input_schema: None,
            output_schema: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp `updated_at` with the current time
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Iteration cap, using `fallback` when unset or zero
    ///
    /// A zero fallback counts as unset too and yields [`DEFAULT_MAX_ITERATIONS`].
    pub fn effective_max_iterations(&self, fallback: u32) -> u32 {
        let fallback = if fallback > 0 {
            fallback
        } else {
            DEFAULT_MAX_ITERATIONS
        };
        self.max_iterations.filter(|n| *n > 0).unwrap_or(fallback)
    }

    // =========================================================================
    // Structural queries
    // =========================================================================

    /// Find a step by its ID
    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The declared start step, if it resolves
    pub fn start_step(&self) -> Option<&Step> {
        self.find_step(&self.start_step_id)
    }

    /// All steps of a given kind, in declaration order
    pub fn steps_by_kind(&self, kind: &StepKind) -> Vec<&Step> {
        self.steps.iter().filter(|s| &s.kind == kind).collect()
    }

    /// The edge group owned by a source step
    pub fn edge_group(&self, source_step_id: &str) -> Option<&EdgeGroup> {
        self.edge_groups
            .iter()
            .find(|g| g.source_step_id == source_step_id)
    }

    /// Edges leaving a step, or empty
    pub fn outgoing_edges(&self, step_id: &str) -> &[Edge] {
        self.edge_group(step_id)
            .map(|g| g.edges.as_slice())
            .unwrap_or(&[])
    }

    /// Edges entering a step, from any group
    pub fn incoming_edges(&self, step_id: &str) -> Vec<IncomingEdge<'_>> {
        self.edge_groups
            .iter()
            .flat_map(|g| {
                g.edges
                    .iter()
                    .filter(move |e| e.target_step_id == step_id)
                    .map(move |edge| IncomingEdge {
                        source_step_id: &g.source_step_id,
                        edge,
                    })
            })
            .collect()
    }

    /// Find a declared variable by name
    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Append a step
    pub fn add_step(&mut self, step: Step) -> Result<()> {
        if self.find_step(&step.id).is_some() {
            return Err(EngineError::InvalidState(format!(
                "Step '{}' already exists",
                step.id
            )));
        }
        self.steps.push(step);
        self.touch();
        Ok(())
    }

    /// Modify a step in place; its id cannot change
    pub fn update_step<F>(&mut self, step_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Step),
    {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| EngineError::not_found(format!("Step '{}'", step_id)))?;
        let id = step.id.clone();
        update(step);
        step.id = id;
        self.touch();
        Ok(())
    }

    /// Remove a step along with its edge group and every edge targeting it
    pub fn remove_step(&mut self, step_id: &str) -> Result<Step> {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| EngineError::not_found(format!("Step '{}'", step_id)))?;
        let removed = self.steps.remove(index);

        self.edge_groups.retain(|g| g.source_step_id != step_id);
        for group in &mut self.edge_groups {
            group.edges.retain(|e| e.target_step_id != step_id);
            if group.default_target_step_id.as_deref() == Some(step_id) {
                group.default_target_step_id = None;
            }
            if group.group_type != EdgeGroupType::FanIn {
                group.group_type = EdgeGroupType::infer(&group.edges);
            }
        }
        self.edge_groups
            .retain(|g| !g.edges.is_empty() || g.default_target_step_id.is_some());

        if self.start_step_id == step_id {
            self.start_step_id.clear();
        }
        self.touch();
        Ok(removed)
    }

    /// Append an edge to the source's group, creating the group if needed
    ///
    /// The group type is re-inferred unless it was explicitly set to FanIn.
    pub fn connect(&mut self, source_step_id: &str, edge: Edge) -> Result<()> {
        for id in [source_step_id, edge.target_step_id.as_str()] {
            if self.find_step(id).is_none() {
                return Err(EngineError::not_found(format!("Step '{}'", id)));
            }
        }

        let group = match self
            .edge_groups
            .iter()
            .position(|g| g.source_step_id == source_step_id)
        {
            Some(index) => &mut self.edge_groups[index],
            None => {
                self.edge_groups.push(EdgeGroup::new(
                    format!("{}-edges", source_step_id),
                    source_step_id,
                ));
                let last = self.edge_groups.len() - 1;
                &mut self.edge_groups[last]
            }
        };
        group.edges.push(edge);
        if group.group_type != EdgeGroupType::FanIn {
            group.group_type = EdgeGroupType::infer(&group.edges);
        }
        self.touch();
        Ok(())
    }

    /// Remove every edge from `source` to `target`; returns how many were removed
    pub fn disconnect(&mut self, source_step_id: &str, target_step_id: &str) -> usize {
        let mut removed = 0;
        if let Some(group) = self
            .edge_groups
            .iter_mut()
            .find(|g| g.source_step_id == source_step_id)
        {
            let before = group.edges.len();
            group.edges.retain(|e| e.target_step_id != target_step_id);
            removed = before - group.edges.len();
            if group.group_type != EdgeGroupType::FanIn {
                group.group_type = EdgeGroupType::infer(&group.edges);
            }
        }
        self.edge_groups
            .retain(|g| !g.edges.is_empty() || g.default_target_step_id.is_some());
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Override the type of a source's edge group
    pub fn set_edge_group_type(&mut self, source_step_id: &str, group_type: EdgeGroupType) -> Result<()> {
        let group = self
            .edge_groups
            .iter_mut()
            .find(|g| g.source_step_id == source_step_id)
            .ok_or_else(|| EngineError::not_found(format!("Edge group for '{}'", source_step_id)))?;
        group.group_type = group_type;
        self.touch();
        Ok(())
    }

    /// Set or clear the fallback target of a source's edge group
    pub fn set_default_target(&mut self, source_step_id: &str, target: Option<StepId>) -> Result<()> {
        if self.find_step(source_step_id).is_none() {
            return Err(EngineError::not_found(format!("Step '{}'", source_step_id)));
        }
        if let Some(index) = self
            .edge_groups
            .iter()
            .position(|g| g.source_step_id == source_step_id)
        {
            self.edge_groups[index].default_target_step_id = target;
        } else if target.is_some() {
            let mut group = EdgeGroup::new(format!("{}-edges", source_step_id), source_step_id);
            group.group_type = EdgeGroupType::SwitchCase;
            group.default_target_step_id = target;
            self.edge_groups.push(group);
        }
        self.touch();
        Ok(())
    }

    /// Point the workflow at a new start step
    pub fn set_start_step(&mut self, step_id: &str) -> Result<()> {
        if self.find_step(step_id).is_none() {
            return Err(EngineError::not_found(format!("Step '{}'", step_id)));
        }
        self.start_step_id = step_id.to_string();
        self.touch();
        Ok(())
    }

    /// Declare a variable
    pub fn add_variable(&mut self, variable: Variable) -> Result<()> {
        if self.find_variable(&variable.name).is_some() {
            return Err(EngineError::InvalidState(format!(
                "Variable '{}' already exists",
                variable.name
            )));
        }
        self.variables.push(variable);
        self.touch();
        Ok(())
    }

    /// Remove a declared variable
    pub fn remove_variable(&mut self, name: &str) -> Option<Variable> {
        let index = self.variables.iter().position(|v| v.name == name)?;
        self.touch();
        Some(self.variables.remove(index))
    }

    // =========================================================================
    // Comparison
    // =========================================================================

    /// Graph isomorphism ignoring layout, edge/group ids, empty groups and timestamps
    pub fn structurally_eq(&self, other: &WorkflowDefinition) -> bool {
        self.start_step_id == other.start_step_id
            && self.max_iterations == other.max_iterations
            && self.input_schema == other.input_schema
            && self.output_schema == other.output_schema
            && self.variables == other.variables
            && self.steps.len() == other.steps.len()
            && self
                .steps
                .iter()
                .zip(&other.steps)
                .all(|(a, b)| step_signature(a) == step_signature(b))
            && group_signatures(self) == group_signatures(other)
    }
}

type StepSignature<'a> = (&'a str, &'a StepKind, &'a str, &'a str, bool, &'a StepConfig);

fn step_signature(step: &Step) -> StepSignature<'_> {
    (
        &step.id,
        &step.kind,
        &step.name,
        &step.description,
        step.disabled,
        &step.config,
    )
}

type EdgeSignature<'a> = (&'a str, Option<&'a str>, Option<&'a str>);
type GroupSignature<'a> = (EdgeGroupType, Vec<EdgeSignature<'a>>, Option<&'a str>);

fn group_signatures(definition: &WorkflowDefinition) -> HashMap<&str, GroupSignature<'_>> {
    definition
        .edge_groups
        .iter()
        .filter(|g| !g.edges.is_empty() || g.default_target_step_id.is_some())
        .map(|g| {
            let edges = g
                .edges
                .iter()
                .map(|e| (e.target_step_id.as_str(), e.condition_expr(), e.label.as_deref()))
                .collect();
            (
                g.source_step_id.as_str(),
                (g.group_type, edges, g.default_target_step_id.as_deref()),
            )
        })
        .collect()
}
