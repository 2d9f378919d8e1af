//! Mutable variable context threaded through one execution run.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::WorkflowDefinition;

/// Key/value variables for a single run.
///
/// Created from a definition's declared defaults plus the run input, then
/// mutated only by the interpreter while it applies step outcomes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    data: HashMap<String, Value>,
}

impl VariableContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with initial data.
    pub fn with_data(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// Seed a context for a run.
    ///
    /// Declared variables with a default are inserted first; the input is then
    /// written under `input_key`, overriding any default of the same name.
    pub fn seeded(definition: &WorkflowDefinition, input_key: &str, input: &str) -> Self {
        let mut context = Self::new();
        for variable in &definition.variables {
            if let Some(default) = &variable.default {
                context.set(variable.name.clone(), default.clone());
            }
        }
        context.set(input_key, Value::String(input.to_string()));
        context
    }

    /// Get a value from the context.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value rendered as text, if present.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.data.get(key).map(render_value)
    }

    /// Set a value in the context.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Remove a value from the context.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a key exists in the context.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Apply a batch of updates.
    pub fn apply(&mut self, updates: HashMap<String, Value>) {
        self.data.extend(updates);
    }

    /// Get all data as a reference.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    /// Get all data, consuming the context.
    pub fn into_data(self) -> HashMap<String, Value> {
        self.data
    }
}

/// Render a JSON value the way templates see it.
///
/// Strings are raw, null is empty and everything else is compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
