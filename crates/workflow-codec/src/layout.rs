//! Breadth-first placement of imported steps
//!
//! Positions are a visual hint only. The executor never reads them and
//! structural comparison ignores them.

use std::collections::{HashMap, HashSet, VecDeque};

use workflow_engine::WorkflowDefinition;

/// Horizontal distance between levels
pub const COLUMN_WIDTH: f64 = 280.0;
/// Vertical distance between steps of one level
pub const ROW_HEIGHT: f64 = 140.0;

/// Assign `(level * 280, row * 140)` to every step
///
/// Level 0 holds the start step followed by every other step without
/// incoming edges. Steps never reached share one column after the deepest
/// level.
pub fn apply(definition: &mut WorkflowDefinition) {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut has_incoming: HashSet<&str> = HashSet::new();
    for group in &definition.edge_groups {
        let targets = successors.entry(group.source_step_id.as_str()).or_default();
        let edge_targets = group.edges.iter().map(|e| e.target_step_id.as_str());
        for target in edge_targets.chain(group.default_target_step_id.as_deref()) {
            targets.push(target);
            has_incoming.insert(target);
        }
    }

    let known: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
    let mut roots: Vec<&str> = Vec::new();
    if known.contains(definition.start_step_id.as_str()) {
        roots.push(definition.start_step_id.as_str());
    }
    roots.extend(
        definition
            .steps
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !has_incoming.contains(id) && *id != definition.start_step_id),
    );

    let mut levels: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for root in roots {
        levels.insert(root, 0);
        queue.push_back(root);
    }
    while let Some(current) = queue.pop_front() {
        let next_level = levels[current] + 1;
        for &target in successors.get(current).into_iter().flatten() {
            if known.contains(target) && !levels.contains_key(target) {
                levels.insert(target, next_level);
                queue.push_back(target);
            }
        }
    }

    let orphan_level = levels.values().max().map_or(0, |deepest| deepest + 1);
    let levels: HashMap<String, usize> = levels
        .into_iter()
        .map(|(id, level)| (id.to_string(), level))
        .collect();

    let mut rows: HashMap<usize, usize> = HashMap::new();
    for step in &mut definition.steps {
        let level = levels.get(&step.id).copied().unwrap_or(orphan_level);
        let row = rows.entry(level).or_insert(0);
        step.position = (level as f64 * COLUMN_WIDTH, *row as f64 * ROW_HEIGHT);
        *row += 1;
    }
}
