//! Structural validation for workflow definitions
//!
//! Validation is advisory: problems come back as data in a
//! [`ValidationReport`] and are never raised as errors. Callers gate saving or
//! running on [`ValidationReport::is_valid`] and treat warnings as
//! non-blocking.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::types::{StepKind, WorkflowDefinition};

/// A structural error that makes a workflow unsafe to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `startStepId` is empty or does not resolve
    MissingStart { start_step_id: String },
    /// A group source, edge target or jump target does not resolve
    InvalidConnection {
        source_step_id: String,
        target_step_id: String,
    },
    /// A back-edge was found in the edge set
    Cycle {
        source_step_id: String,
        target_step_id: String,
    },
    /// Two steps share an id
    DuplicateStep { step_id: String },
    /// Two edge groups share a source step
    DuplicateEdgeGroup { source_step_id: String },
}

impl ValidationError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingStart { .. } => "missing_start",
            Self::InvalidConnection { .. } => "invalid_connection",
            Self::Cycle { .. } => "cycle",
            Self::DuplicateStep { .. } => "duplicate_step",
            Self::DuplicateEdgeGroup { .. } => "duplicate_edge_group",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingStart { start_step_id } if start_step_id.is_empty() => {
                write!(f, "Workflow has no start step")
            }
            Self::MissingStart { start_step_id } => {
                write!(f, "Start step '{}' does not exist", start_step_id)
            }
            Self::InvalidConnection {
                source_step_id,
                target_step_id,
            } => {
                write!(
                    f,
                    "Connection '{}' -> '{}' references an unknown step",
                    source_step_id, target_step_id
                )
            }
            Self::Cycle {
                source_step_id,
                target_step_id,
            } => {
                write!(
                    f,
                    "Cycle detected: edge '{}' -> '{}' closes a loop",
                    source_step_id, target_step_id
                )
            }
            Self::DuplicateStep { step_id } => {
                write!(f, "Step id '{}' is used more than once", step_id)
            }
            Self::DuplicateEdgeGroup { source_step_id } => {
                write!(f, "Step '{}' owns more than one edge group", source_step_id)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A non-blocking structural observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A non-start step that nothing points at
    Unreachable { step_id: String },
}

impl ValidationWarning {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable { step_id } => {
                write!(f, "Step '{}' has no incoming connections", step_id)
            }
        }
    }
}

/// Flattened issue used when reporting to callers outside the crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
}

/// Result of validating a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// True when there are no errors; warnings do not count
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any error carries the given code
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code() == code)
    }

    /// Whether any warning carries the given code
    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code() == code)
    }

    /// Errors as code/message pairs
    pub fn error_issues(&self) -> Vec<ValidationIssue> {
        self.errors
            .iter()
            .map(|e| ValidationIssue {
                code: e.code(),
                message: e.to_string(),
            })
            .collect()
    }

    /// Warnings as code/message pairs
    pub fn warning_issues(&self) -> Vec<ValidationIssue> {
        self.warnings
            .iter()
            .map(|w| ValidationIssue {
                code: w.code(),
                message: w.to_string(),
            })
            .collect()
    }
}

/// Validate a workflow definition
///
/// Returns every problem found, not just the first.
pub fn validate(definition: &WorkflowDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_unique_ids(definition, &mut report.errors);
    validate_start(definition, &mut report.errors);
    validate_connections(definition, &mut report.errors);
    detect_cycles(definition, &mut report.errors);
    find_unreachable(definition, &mut report.warnings);

    report
}

fn validate_unique_ids(definition: &WorkflowDefinition, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.id.as_str()) && reported.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStep {
                step_id: step.id.clone(),
            });
        }
    }

    let mut sources = HashSet::new();
    let mut reported = HashSet::new();
    for group in &definition.edge_groups {
        let source = group.source_step_id.as_str();
        if !sources.insert(source) && reported.insert(source) {
            errors.push(ValidationError::DuplicateEdgeGroup {
                source_step_id: group.source_step_id.clone(),
            });
        }
    }
}

fn validate_start(definition: &WorkflowDefinition, errors: &mut Vec<ValidationError>) {
    if definition.start_step_id.is_empty() || definition.start_step().is_none() {
        errors.push(ValidationError::MissingStart {
            start_step_id: definition.start_step_id.clone(),
        });
    }
}

/// Check that group sources, edge targets and goto targets exist
fn validate_connections(definition: &WorkflowDefinition, errors: &mut Vec<ValidationError>) {
    let step_ids: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();

    for group in &definition.edge_groups {
        let source = group.source_step_id.as_str();
        let targets = group
            .edges
            .iter()
            .map(|e| e.target_step_id.as_str())
            .chain(group.default_target_step_id.as_deref());

        if !step_ids.contains(source) {
            let target = group
                .edges
                .first()
                .map(|e| e.target_step_id.clone())
                .unwrap_or_default();
            errors.push(ValidationError::InvalidConnection {
                source_step_id: source.to_string(),
                target_step_id: target,
            });
        }
        for target in targets {
            if !step_ids.contains(target) {
                errors.push(ValidationError::InvalidConnection {
                    source_step_id: source.to_string(),
                    target_step_id: target.to_string(),
                });
            }
        }
    }

    for step in definition.steps_by_kind(&StepKind::Goto) {
        let target = step.config_str("targetStepId").unwrap_or_default();
        if !step_ids.contains(target) {
            errors.push(ValidationError::InvalidConnection {
                source_step_id: step.id.clone(),
                target_step_id: target.to_string(),
            });
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-color DFS over the full edge set
///
/// Every step is used as a root so cycles in dead branches are caught too.
/// Goto jumps are excluded since they are the explicit looping construct.
fn detect_cycles(definition: &WorkflowDefinition, errors: &mut Vec<ValidationError>) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots: Vec<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
    for group in &definition.edge_groups {
        let targets = adjacency.entry(group.source_step_id.as_str()).or_default();
        targets.extend(group.edges.iter().map(|e| e.target_step_id.as_str()));
        targets.extend(group.default_target_step_id.as_deref());
        roots.push(group.source_step_id.as_str());
    }

    let mut colors: HashMap<&str, Color> = HashMap::new();
    let mut back_edges: HashSet<(&str, &str)> = HashSet::new();

    for root in roots {
        if colors.get(root).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }

        // (node, index of next child to visit)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        colors.insert(root, Color::Gray);

        while let Some((node, index)) = stack.last_mut() {
            let children = adjacency.get(*node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&child) = children.get(*index) {
                *index += 1;
                let source = *node;
                match colors.get(child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        colors.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    Color::Gray => {
                        if back_edges.insert((source, child)) {
                            errors.push(ValidationError::Cycle {
                                source_step_id: source.to_string(),
                                target_step_id: child.to_string(),
                            });
                        }
                    }
                    Color::Black => {}
                }
            } else {
                colors.insert(*node, Color::Black);
                stack.pop();
            }
        }
    }
}

/// Warn about non-start steps with no incoming reference
fn find_unreachable(definition: &WorkflowDefinition, warnings: &mut Vec<ValidationWarning>) {
    let mut referenced: HashSet<&str> = HashSet::new();
    for group in &definition.edge_groups {
        referenced.extend(group.edges.iter().map(|e| e.target_step_id.as_str()));
        referenced.extend(group.default_target_step_id.as_deref());
    }
    for step in &definition.steps {
        match step.kind {
            StepKind::Goto => referenced.extend(step.config_str("targetStepId")),
            StepKind::ConditionGroup => referenced.extend(step.config_str("defaultTargetStepId")),
            _ => {}
        }
    }

    for step in &definition.steps {
        if step.id != definition.start_step_id && !referenced.contains(step.id.as_str()) {
            warnings.push(ValidationWarning::Unreachable {
                step_id: step.id.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::types::{Edge, EdgeGroup, Step};

    fn linear() -> WorkflowDefinition {
        WorkflowBuilder::new("wf", "Linear")
            .add_step("a", StepKind::SendMessage)
            .add_step("b", StepKind::SetVariable)
            .add_step("c", StepKind::EndWorkflow)
            .connect("a", "b")
            .connect("b", "c")
            .build()
    }

    #[test]
    fn test_valid_graph() {
        let report = validate(&linear());
        assert!(report.is_valid(), "Expected no errors, got: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_start() {
        let mut wf = linear();
        wf.start_step_id.clear();
        assert!(validate(&wf).has_error("missing_start"));

        wf.start_step_id = "ghost".to_string();
        let report = validate(&wf);
        assert!(report.has_error("missing_start"));
        assert!(report.errors[0].to_string().contains("ghost"));
    }

    #[test]
    fn test_dangling_edge_target() {
        let mut wf = linear();
        wf.edge_groups[0].edges.push(Edge::new("bad", "nowhere"));
        let report = validate(&wf);
        assert!(report.errors.contains(&ValidationError::InvalidConnection {
            source_step_id: "a".to_string(),
            target_step_id: "nowhere".to_string(),
        }));
    }

    #[test]
    fn test_unknown_group_source() {
        let mut wf = linear();
        let mut group = EdgeGroup::new("ghost-edges", "ghost");
        group.edges.push(Edge::new("e", "c"));
        wf.edge_groups.push(group);
        assert!(validate(&wf).has_error("invalid_connection"));
    }

    #[test]
    fn test_goto_target_must_exist() {
        let wf = WorkflowBuilder::new("wf", "Goto")
            .add_step("a", StepKind::Goto)
            .with_config_value("targetStepId", "missing")
            .build();
        assert!(validate(&wf).has_error("invalid_connection"));
    }

    #[test]
    fn test_back_edge_detected() {
        let wf = WorkflowBuilder::new("wf", "Cyclic")
            .add_step("s1", StepKind::SendMessage)
            .add_step("s2", StepKind::SendMessage)
            .connect("s1", "s2")
            .connect("s2", "s1")
            .build();
        assert!(validate(&wf).has_error("cycle"));
    }

    #[test]
    fn test_cycle_in_unreachable_branch() {
        let wf = WorkflowBuilder::new("wf", "Dead loop")
            .add_step("start", StepKind::EndWorkflow)
            .add_step("s1", StepKind::SendMessage)
            .add_step("s2", StepKind::SendMessage)
            .connect("s1", "s2")
            .connect("s2", "s1")
            .start("start")
            .build();
        let report = validate(&wf);
        assert!(report.has_error("cycle"));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let wf = WorkflowBuilder::new("wf", "Self")
            .add_step("a", StepKind::SendMessage)
            .connect("a", "a")
            .build();
        assert!(validate(&wf).has_error("cycle"));
    }

    #[test]
    fn test_diamond_is_not_cycle() {
        let wf = WorkflowBuilder::new("wf", "Diamond")
            .add_step("a", StepKind::SendMessage)
            .add_step("b", StepKind::SendMessage)
            .add_step("c", StepKind::SendMessage)
            .add_step("d", StepKind::EndWorkflow)
            .connect("a", "b")
            .connect("a", "c")
            .connect("b", "d")
            .connect("c", "d")
            .build();
        let report = validate(&wf);
        assert!(!report.has_error("cycle"), "{:?}", report.errors);
    }

    #[test]
    fn test_goto_loop_is_not_cycle() {
        let wf = WorkflowBuilder::new("wf", "Retry")
            .add_step("ask", StepKind::AskQuestion)
            .add_step("again", StepKind::Goto)
            .with_config_value("targetStepId", "ask")
            .connect("ask", "again")
            .build();
        let report = validate(&wf);
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_unreachable_warning_is_not_error() {
        let mut wf = linear();
        wf.add_step(Step::new("orphan", StepKind::SendMessage)).unwrap();
        let report = validate(&wf);
        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::Unreachable {
                step_id: "orphan".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicates() {
        let mut wf = linear();
        wf.steps.push(Step::new("b", StepKind::SendMessage));
        wf.edge_groups.push(EdgeGroup::new("dup", "a"));
        let report = validate(&wf);
        assert!(report.has_error("duplicate_step"));
        assert!(report.has_error("duplicate_edge_group"));
    }

    #[test]
    fn test_issue_codes() {
        let mut wf = linear();
        wf.start_step_id.clear();
        let issues = validate(&wf).error_issues();
        assert_eq!(issues[0].code, "missing_start");
        assert_eq!(issues[0].message, "Workflow has no start step");
    }
}
