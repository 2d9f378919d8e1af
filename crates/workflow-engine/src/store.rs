//! Workflow storage with file persistence.
//!
//! Definitions are held as `Arc` snapshots, so a run that already prepared a
//! workflow keeps its snapshot while edits produce a new one. Every change
//! evicts the attached [`RunnableCache`] entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{PreparedWorkflow, RunnableCache};
use crate::error::{EngineError, Result};
use crate::types::WorkflowDefinition;

/// Metadata for a stored workflow (for listing).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub step_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// File holding a workflow inside the store directory.
///
/// Ids come from imported documents, so anything that could name a path
/// outside `dir` is rejected.
fn workflow_file(dir: &Path, id: &str) -> Result<PathBuf> {
    let unsafe_id = id.is_empty()
        || id.contains(['/', '\\', '\0'])
        || id.contains("..");
    if unsafe_id {
        return Err(EngineError::InvalidState(format!(
            "Workflow id '{}' cannot be used as a file name",
            id
        )));
    }
    Ok(dir.join(format!("{}.json", id)))
}

/// In-memory workflow store with optional file persistence.
///
/// # Example
///
/// ```ignore
/// let cache = Arc::new(RunnableCache::new());
/// let mut store = WorkflowStore::with_persistence(".workflows").with_cache(cache);
/// store.load_from_disk()?;
/// store.update("support-triage", |wf| wf.set_start_step("greet"))?;
/// let runnable = store.runnable("support-triage")?;
/// ```
#[derive(Debug, Default)]
pub struct WorkflowStore {
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
    persist_path: Option<PathBuf>,
    cache: Option<Arc<RunnableCache>>,
}

impl WorkflowStore {
    /// Create a new in-memory store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that persists to the given directory.
    ///
    /// The directory will be created if it doesn't exist when saving.
    pub fn with_persistence(path: impl AsRef<Path>) -> Self {
        Self {
            persist_path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Attach a runnable cache to keep in sync with edits.
    pub fn with_cache(mut self, cache: Arc<RunnableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Load all workflows from the persistence directory.
    ///
    /// Unparseable files are skipped with a warning. Returns the number of
    /// workflows loaded.
    pub fn load_from_disk(&mut self) -> Result<usize> {
        let Some(ref path) = self.persist_path else {
            return Ok(0);
        };

        if !path.exists() {
            return Ok(0);
        }

        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file_path = entry?.path();
            if file_path.extension().map_or(false, |e| e == "json") {
                let content = std::fs::read_to_string(&file_path)?;
                match serde_json::from_str::<WorkflowDefinition>(&content) {
                    Ok(workflow) => {
                        log::info!("Loaded workflow '{}' from {:?}", workflow.id, file_path);
                        loaded.push(workflow);
                    }
                    Err(e) => {
                        log::warn!("Failed to parse workflow from {:?}: {}", file_path, e);
                    }
                }
            }
        }

        let count = loaded.len();
        for workflow in loaded {
            self.evict(&workflow.id);
            self.workflows.insert(workflow.id.clone(), Arc::new(workflow));
        }
        Ok(count)
    }

    /// Save a workflow to disk (if persistence is enabled).
    fn save_to_disk(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        let file_path = workflow_file(path, &workflow.id)?;
        std::fs::create_dir_all(path)?;
        let content = serde_json::to_string_pretty(workflow)?;
        std::fs::write(&file_path, content)?;
        log::debug!("Saved workflow '{}' to {:?}", workflow.id, file_path);
        Ok(())
    }

    /// Delete a workflow from disk (if persistence is enabled).
    fn delete_from_disk(&self, id: &str) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        let file_path = workflow_file(path, id)?;
        if file_path.exists() {
            std::fs::remove_file(&file_path)?;
            log::debug!("Deleted workflow '{}' from {:?}", id, file_path);
        }
        Ok(())
    }

    fn evict(&self, id: &str) {
        if let Some(cache) = &self.cache {
            cache.evict(id);
        }
    }

    /// Get a workflow by ID.
    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(id).cloned()
    }

    /// Insert or replace a workflow.
    pub fn insert(&mut self, workflow: WorkflowDefinition) -> Result<()> {
        self.save_to_disk(&workflow)?;
        self.evict(&workflow.id);
        self.workflows.insert(workflow.id.clone(), Arc::new(workflow));
        Ok(())
    }

    /// Edit a workflow in place.
    ///
    /// The closure works on a private copy; the change is committed (and
    /// `updatedAt` stamped) only if it returns `Ok`. The id cannot change.
    pub fn update<F, T>(&mut self, id: &str, edit: F) -> Result<T>
    where
        F: FnOnce(&mut WorkflowDefinition) -> Result<T>,
    {
        let mut snapshot = self
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("Workflow '{}'", id)))?;

        let workflow = Arc::make_mut(&mut snapshot);
        let value = edit(workflow)?;
        workflow.id = id.to_string();
        workflow.touch();

        self.save_to_disk(&snapshot)?;
        self.evict(id);
        self.workflows.insert(id.to_string(), snapshot);
        Ok(value)
    }

    /// Remove a workflow by ID.
    ///
    /// Returns the removed workflow if it existed.
    pub fn remove(&mut self, id: &str) -> Result<Option<Arc<WorkflowDefinition>>> {
        self.delete_from_disk(id)?;
        self.evict(id);
        Ok(self.workflows.remove(id))
    }

    /// Prepared runnable for a workflow, through the cache when attached.
    pub fn runnable(&self, id: &str) -> Result<Arc<PreparedWorkflow>> {
        let workflow = self
            .workflows
            .get(id)
            .ok_or_else(|| EngineError::not_found(format!("Workflow '{}'", id)))?;
        Ok(match &self.cache {
            Some(cache) => cache.get_or_prepare(workflow),
            None => Arc::new(PreparedWorkflow::new(workflow.clone())),
        })
    }

    /// List all workflows, ordered by ID.
    pub fn list(&self) -> Vec<WorkflowMetadata> {
        let mut items: Vec<_> = self
            .workflows
            .values()
            .map(|w| WorkflowMetadata {
                id: w.id.clone(),
                name: w.name.clone(),
                description: w.description.clone(),
                step_count: w.steps.len(),
                updated_at: w.updated_at,
            })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Check if a workflow exists.
    pub fn contains(&self, id: &str) -> bool {
        self.workflows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
