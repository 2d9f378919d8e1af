//! Steps/edges dialect decoder
//!
//! Each entry declares its own outgoing edges. This is also the shape the
//! encoder writes.

use std::collections::HashSet;

use serde_json::{Map, Value};
use workflow_engine::{Edge, EdgeGroup, EdgeGroupType, WorkflowDefinition};

use crate::error::{CodecError, Result};
use crate::fields::{decode_step, read_header, scalar_text};
use crate::layout;

/// Structural keys of a step entry
pub(crate) const RESERVED: [&str; 3] = ["edges", "edgeType", "defaultTarget"];

/// Parse an `edgeType` value
pub(crate) fn parse_edge_type(name: &str) -> Option<EdgeGroupType> {
    match name {
        "Single" => Some(EdgeGroupType::Single),
        "FanOut" => Some(EdgeGroupType::FanOut),
        "FanIn" => Some(EdgeGroupType::FanIn),
        "SwitchCase" => Some(EdgeGroupType::SwitchCase),
        _ => None,
    }
}

/// Name written for an edge group type
pub(crate) fn edge_type_name(group_type: EdgeGroupType) -> &'static str {
    match group_type {
        EdgeGroupType::Single => "Single",
        EdgeGroupType::FanOut => "FanOut",
        EdgeGroupType::FanIn => "FanIn",
        EdgeGroupType::SwitchCase => "SwitchCase",
    }
}

/// Decode a document whose `steps` or `executors` key is present
pub(crate) fn decode(doc: &Map<String, Value>) -> Result<WorkflowDefinition> {
    let mut definition = WorkflowDefinition::new("", "");
    read_header(doc, &mut definition)?;

    let (list_key, entries) = ["steps", "executors"]
        .iter()
        .find_map(|key| doc.get(*key).map(|value| (*key, value)))
        .ok_or_else(|| CodecError::UnrecognizedStructure("no step list".to_string()))?;
    let entries = match entries {
        Value::Null => &[][..],
        Value::Array(items) => items.as_slice(),
        _ => return Err(CodecError::invalid_field(list_key, "expected a list")),
    };

    let mut seen = HashSet::new();
    for (index, value) in entries.iter().enumerate() {
        let field = format!("{}[{}]", list_key, index);
        let entry = value
            .as_object()
            .ok_or_else(|| CodecError::invalid_field(&field, "expected an object"))?;
        let id = scalar_text(entry.get("id"), "id")?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CodecError::invalid_field(format!("{}.id", field), "missing step id"))?;
        if !seen.insert(id.clone()) {
            return Err(CodecError::DuplicateStep(id));
        }

        if let Some(group) = decode_group(entry, &id, &field)? {
            definition.edge_groups.push(group);
        }
        definition.steps.push(decode_step(entry, id, &RESERVED)?);
    }

    definition.start_step_id = match doc.get("startStep") {
        Some(Value::String(explicit)) => explicit.clone(),
        _ => first_root(&definition),
    };
    layout::apply(&mut definition);

    log::debug!(
        "Decoded steps/edges workflow '{}' with {} steps and {} edge groups",
        definition.id,
        definition.steps.len(),
        definition.edge_groups.len()
    );
    Ok(definition)
}

/// Build the outgoing group of one entry, if it declares any edges
fn decode_group(entry: &Map<String, Value>, source: &str, field: &str) -> Result<Option<EdgeGroup>> {
    let group_id = format!("{}-edges", source);
    let mut group = EdgeGroup::new(group_id.as_str(), source);

    match entry.get("edges") {
        None | Some(Value::Null) => {}
        Some(Value::Array(edges)) => {
            for (index, raw) in edges.iter().enumerate() {
                let edge_field = format!("{}.edges[{}]", field, index);
                let raw = raw
                    .as_object()
                    .ok_or_else(|| CodecError::invalid_field(&edge_field, "expected an object"))?;
                let target = scalar_text(raw.get("targetId"), "targetId")?.ok_or_else(|| {
                    CodecError::invalid_field(format!("{}.targetId", edge_field), "missing target")
                })?;
                let mut edge = Edge::new(format!("{}-{}", group_id, index), target);
                edge.condition = scalar_text(raw.get("condition"), "condition")?;
                edge.label = scalar_text(raw.get("label"), "label")?;
                group.edges.push(edge);
            }
        }
        Some(_) => return Err(CodecError::invalid_field(format!("{}.edges", field), "expected a list")),
    }

    group.default_target_step_id = scalar_text(entry.get("defaultTarget"), "defaultTarget")?;
    if group.edges.is_empty() && group.default_target_step_id.is_none() {
        return Ok(None);
    }

    group.group_type = match scalar_text(entry.get("edgeType"), "edgeType")? {
        Some(name) => parse_edge_type(&name).ok_or_else(|| {
            CodecError::invalid_field(
                format!("{}.edgeType", field),
                format!("unknown edge type '{}'", name),
            )
        })?,
        None => EdgeGroupType::infer(&group.edges),
    };
    Ok(Some(group))
}

/// First step, in declaration order, that nothing points at
fn first_root(definition: &WorkflowDefinition) -> String {
    let targets: HashSet<&str> = definition
        .edge_groups
        .iter()
        .flat_map(|g| {
            g.edges
                .iter()
                .map(|e| e.target_step_id.as_str())
                .chain(g.default_target_step_id.as_deref())
        })
        .collect();

    definition
        .steps
        .iter()
        .find(|s| !targets.contains(s.id.as_str()))
        .or_else(|| definition.steps.first())
        .map(|s| s.id.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workflow_engine::StepKind;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_start_is_first_step_without_incoming() {
        let wf = decode(&doc(json!({
            "kind": "Workflow",
            "steps": [
                {"id": "b", "kind": "SendActivity", "activity": "second"},
                {"id": "a", "kind": "SendActivity", "activity": "first",
                 "edges": [{"targetId": "b"}]},
                {"id": "c", "kind": "EndWorkflow"}
            ]
        })))
        .unwrap();
        assert_eq!(wf.start_step_id, "a");
        assert_eq!(wf.edge_groups.len(), 1);
        assert_eq!(wf.edge_groups[0].group_type, EdgeGroupType::Single);
    }

    #[test]
    fn test_every_step_has_incoming() {
        let wf = decode(&doc(json!({
            "kind": "Workflow",
            "executors": [
                {"id": "x", "edges": [{"targetId": "y"}]},
                {"id": "y", "edges": [{"targetId": "x"}]}
            ]
        })))
        .unwrap();
        assert_eq!(wf.start_step_id, "x");
        assert_eq!(wf.steps[0].kind, StepKind::Custom(String::new()));
    }

    #[test]
    fn test_explicit_start_wins() {
        let wf = decode(&doc(json!({
            "kind": "Workflow",
            "startStep": "b",
            "steps": [
                {"id": "a", "edges": [{"targetId": "b"}]},
                {"id": "b"}
            ]
        })))
        .unwrap();
        assert_eq!(wf.start_step_id, "b");
        assert_eq!(wf.steps[1].position, (0.0, 0.0));
    }

    #[test]
    fn test_group_types() {
        let wf = decode(&doc(json!({
            "kind": "Workflow",
            "steps": [
                {"id": "fan", "edges": [{"targetId": "a"}, {"targetId": "b"}]},
                {"id": "a", "edges": [{"targetId": "join"}], "edgeType": "FanIn"},
                {"id": "b", "edges": [{"targetId": "join", "condition": "=${ok}", "label": "ok"},
                                      {"targetId": "a"}]},
                {"id": "route", "kind": "ConditionGroup", "defaultTarget": "join"},
                {"id": "join"}
            ]
        })))
        .unwrap();
        assert_eq!(wf.edge_group("fan").unwrap().group_type, EdgeGroupType::FanOut);
        assert_eq!(wf.edge_group("a").unwrap().group_type, EdgeGroupType::FanIn);

        let switch = wf.edge_group("b").unwrap();
        assert_eq!(switch.group_type, EdgeGroupType::SwitchCase);
        assert_eq!(switch.edges[0].condition_expr(), Some("=${ok}"));
        assert_eq!(switch.edges[0].label.as_deref(), Some("ok"));
        assert_eq!(switch.edges[1].id, "b-edges-1");

        let route = wf.edge_group("route").unwrap();
        assert!(route.edges.is_empty());
        assert_eq!(route.default_target_step_id.as_deref(), Some("join"));
        assert!(wf.edge_group("join").is_none());
    }

    #[test]
    fn test_structural_errors() {
        let bad_type = decode(&doc(json!({
            "kind": "Workflow",
            "steps": [{"id": "a", "edges": [{"targetId": "a"}], "edgeType": "Sideways"}]
        })));
        assert!(matches!(bad_type, Err(CodecError::InvalidField { ref field, .. }) if field == "steps[0].edgeType"));

        let no_target = decode(&doc(json!({
            "kind": "Workflow",
            "steps": [{"id": "a", "edges": [{"label": "lost"}]}]
        })));
        assert!(matches!(no_target, Err(CodecError::InvalidField { .. })));

        let no_id = decode(&doc(json!({"kind": "Workflow", "steps": [{"kind": "EndWorkflow"}]})));
        assert!(matches!(no_id, Err(CodecError::InvalidField { .. })));

        let duplicate = decode(&doc(json!({"kind": "Workflow", "steps": [{"id": "a"}, {"id": "a"}]})));
        assert!(matches!(duplicate, Err(CodecError::DuplicateStep(_))));
    }

    #[test]
    fn test_dangling_targets_are_kept() {
        let wf = decode(&doc(json!({
            "kind": "Workflow",
            "steps": [{"id": "a", "edges": [{"targetId": "ghost"}]}]
        })))
        .unwrap();
        assert_eq!(wf.outgoing_edges("a")[0].target_step_id, "ghost");
    }
}
