//! Prepared workflows and the runnable cache
//!
//! Preparing a workflow builds id lookups once so the interpreter does not
//! scan step and group lists on every transition. The cache is an explicit
//! object rather than process-wide state; whoever owns the definitions (see
//! [`crate::store::WorkflowStore`]) evicts entries when they change.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{Edge, EdgeGroup, Step, WorkflowDefinition};

/// An immutable, indexed snapshot of a workflow ready to run
#[derive(Debug)]
pub struct PreparedWorkflow {
    definition: Arc<WorkflowDefinition>,
    step_index: HashMap<String, usize>,
    group_index: HashMap<String, usize>,
}

impl PreparedWorkflow {
    /// Index a definition
    ///
    /// On duplicate ids the first occurrence wins, matching linear lookup.
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        let mut step_index = HashMap::with_capacity(definition.steps.len());
        for (i, step) in definition.steps.iter().enumerate() {
            step_index.entry(step.id.clone()).or_insert(i);
        }
        let mut group_index = HashMap::with_capacity(definition.edge_groups.len());
        for (i, group) in definition.edge_groups.iter().enumerate() {
            group_index.entry(group.source_step_id.clone()).or_insert(i);
        }
        Self {
            definition,
            step_index,
            group_index,
        }
    }

    /// The underlying definition
    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    /// When the snapshot's definition was last modified
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.definition.updated_at
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.step_index
            .get(step_id)
            .map(|&i| &self.definition.steps[i])
    }

    pub fn edge_group(&self, source_step_id: &str) -> Option<&EdgeGroup> {
        self.group_index
            .get(source_step_id)
            .map(|&i| &self.definition.edge_groups[i])
    }

    pub fn outgoing_edges(&self, step_id: &str) -> &[Edge] {
        self.edge_group(step_id)
            .map(|g| g.edges.as_slice())
            .unwrap_or(&[])
    }
}

impl From<WorkflowDefinition> for PreparedWorkflow {
    fn from(definition: WorkflowDefinition) -> Self {
        Self::new(Arc::new(definition))
    }
}

/// Cache of prepared workflows keyed by workflow id
#[derive(Debug, Default)]
pub struct RunnableCache {
    entries: RwLock<HashMap<String, Arc<PreparedWorkflow>>>,
}

impl RunnableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached runnable, rebuilding it if the definition changed
    pub fn get_or_prepare(&self, definition: &Arc<WorkflowDefinition>) -> Arc<PreparedWorkflow> {
        if let Some(prepared) = self.entries.read().get(&definition.id) {
            if prepared.updated_at() == definition.updated_at {
                return prepared.clone();
            }
        }

        log::debug!("Preparing workflow '{}'", definition.id);
        let prepared = Arc::new(PreparedWorkflow::new(definition.clone()));
        self.entries
            .write()
            .insert(definition.id.clone(), prepared.clone());
        prepared
    }

    /// Look up a cached runnable without preparing
    pub fn get(&self, workflow_id: &str) -> Option<Arc<PreparedWorkflow>> {
        self.entries.read().get(workflow_id).cloned()
    }

    /// Drop the entry for a workflow; returns whether one existed
    pub fn evict(&self, workflow_id: &str) -> bool {
        let removed = self.entries.write().remove(workflow_id).is_some();
        if removed {
            log::debug!("Evicted runnable for workflow '{}'", workflow_id);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::types::StepKind;

    fn workflow() -> Arc<WorkflowDefinition> {
        Arc::new(
            WorkflowBuilder::new("wf", "Cached")
                .add_step("a", StepKind::SendMessage)
                .add_step("b", StepKind::EndWorkflow)
                .connect("a", "b")
                .build(),
        )
    }

    #[test]
    fn test_prepared_lookups() {
        let prepared = PreparedWorkflow::new(workflow());
        assert_eq!(prepared.step("b").map(|s| &s.kind), Some(&StepKind::EndWorkflow));
        assert_eq!(prepared.outgoing_edges("a")[0].target_step_id, "b");
        assert!(prepared.outgoing_edges("b").is_empty());
        assert!(prepared.step("zzz").is_none());
    }

    #[test]
    fn test_cache_reuses_until_definition_changes() {
        let cache = RunnableCache::new();
        let definition = workflow();

        let first = cache.get_or_prepare(&definition);
        let second = cache.get_or_prepare(&definition);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let mut changed = (*definition).clone();
        changed.updated_at = definition.updated_at + chrono::Duration::seconds(1);
        let third = cache.get_or_prepare(&Arc::new(changed));
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_and_clear() {
        let cache = RunnableCache::new();
        cache.get_or_prepare(&workflow());
        assert!(cache.get("wf").is_some());
        assert!(cache.evict("wf"));
        assert!(!cache.evict("wf"));
        assert!(cache.is_empty());

        cache.get_or_prepare(&workflow());
        cache.clear();
        assert!(cache.is_empty());
    }
}
