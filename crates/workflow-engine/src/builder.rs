//! Fluent builder for workflow definitions
//!
//! Provides a compact API for constructing workflows programmatically.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{
    Edge, EdgeGroup, EdgeGroupType, Step, StepKind, Variable, WorkflowDefinition,
};

/// Fluent builder for constructing workflow definitions
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowBuilder::new("wf-1", "Greeter")
///     .add_step("greet", StepKind::SendMessage)
///     .with_config_value("message", "Hello ${input}")
///     .add_step("done", StepKind::EndWorkflow)
///     .connect("greet", "done")
///     .build();
/// ```
///
/// The start step defaults to the first step added. Group types are inferred
/// from their edges unless set with [`WorkflowBuilder::edge_type`].
pub struct WorkflowBuilder {
    definition: WorkflowDefinition,
    start: Option<String>,
    groups: Vec<EdgeGroup>,
    explicit_types: HashMap<String, EdgeGroupType>,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            definition: WorkflowDefinition::new(id, name),
            start: None,
            groups: Vec::new(),
            explicit_types: HashMap::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = description.into();
        self
    }

    /// Set the iteration cap
    pub fn max_iterations(mut self, max: u32) -> Self {
        self.definition.max_iterations = Some(max);
        self
    }

    /// Add a step
    pub fn add_step(mut self, id: impl Into<String>, kind: StepKind) -> Self {
        self.definition.steps.push(Step::new(id, kind));
        self
    }

    /// Set the name of the most recently added step
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        if let Some(step) = self.definition.steps.last_mut() {
            step.name = name.into();
        }
        self
    }

    /// Set a config key on the most recently added step
    pub fn with_config_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(step) = self.definition.steps.last_mut() {
            step.config.insert(key.into(), value.into());
        }
        self
    }

    /// Disable the most recently added step
    pub fn disabled(mut self) -> Self {
        if let Some(step) = self.definition.steps.last_mut() {
            step.disabled = true;
        }
        self
    }

    /// Add an unconditional edge
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.push_edge(source.into(), target.into(), None)
    }

    /// Add a guarded edge
    pub fn connect_if(
        self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.push_edge(source.into(), target.into(), Some(condition.into()))
    }

    /// Set the fallback target of a source's group
    pub fn default_target(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        let group = self.group_mut(source.into());
        group.default_target_step_id = Some(target.into());
        self
    }

    /// Force the type of a source's group
    pub fn edge_type(mut self, source: impl Into<String>, group_type: EdgeGroupType) -> Self {
        self.explicit_types.insert(source.into(), group_type);
        self
    }

    /// Declare a variable
    pub fn variable(mut self, variable: Variable) -> Self {
        self.definition.variables.push(variable);
        self
    }

    /// Set the start step
    pub fn start(mut self, step_id: impl Into<String>) -> Self {
        self.start = Some(step_id.into());
        self
    }

    /// Build the definition without validation
    pub fn build(self) -> WorkflowDefinition {
        let mut definition = self.definition;
        definition.start_step_id = self
            .start
            .or_else(|| definition.steps.first().map(|s| s.id.clone()))
            .unwrap_or_default();

        definition.edge_groups = self
            .groups
            .into_iter()
            .map(|mut group| {
                group.group_type = self
                    .explicit_types
                    .get(&group.source_step_id)
                    .copied()
                    .unwrap_or_else(|| EdgeGroupType::infer(&group.edges));
                group
            })
            .collect();
        definition
    }

    fn push_edge(mut self, source: String, target: String, condition: Option<String>) -> Self {
        let group = self.group_mut(source);
        let mut edge = Edge::new(format!("{}-{}", group.id, group.edges.len()), target);
        edge.condition = condition;
        group.edges.push(edge);
        self
    }

    fn group_mut(&mut self, source: String) -> &mut EdgeGroup {
        let index = match self.groups.iter().position(|g| g.source_step_id == source) {
            Some(index) => index,
            None => {
                self.groups
                    .push(EdgeGroup::new(format!("{}-edges", source), source));
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }
}
