//! Canonical export in the steps/edges dialect

use serde_json::{Map, Value};
use workflow_engine::{EdgeGroup, EdgeGroupType, WorkflowDefinition};

use crate::dialect_graph::{edge_type_name, RESERVED};
use crate::error::Result;
use crate::fields::{encode_step, write_header};

/// Build the document tree for a workflow
///
/// Positions are not written; import recomputes them.
pub(crate) fn encode(definition: &WorkflowDefinition) -> Result<Value> {
    let mut doc = Map::new();
    write_header(definition, &mut doc)?;
    doc.insert(
        "startStep".to_string(),
        Value::from(definition.start_step_id.clone()),
    );

    let steps = definition
        .steps
        .iter()
        .map(|step| {
            let mut entry = encode_step(step, &RESERVED);
            if let Some(group) = definition.edge_group(&step.id) {
                write_group(group, &mut entry);
            }
            Value::Object(entry)
        })
        .collect();
    doc.insert("steps".to_string(), Value::Array(steps));
    Ok(Value::Object(doc))
}

fn write_group(group: &EdgeGroup, entry: &mut Map<String, Value>) {
    if !group.edges.is_empty() {
        let edges = group
            .edges
            .iter()
            .map(|edge| {
                let mut out = Map::new();
                out.insert("targetId".to_string(), Value::from(edge.target_step_id.clone()));
                if let Some(condition) = &edge.condition {
                    out.insert("condition".to_string(), Value::from(condition.clone()));
                }
                if let Some(label) = &edge.label {
                    out.insert("label".to_string(), Value::from(label.clone()));
                }
                Value::Object(out)
            })
            .collect();
        entry.insert("edges".to_string(), Value::Array(edges));
    }

    let inferred = EdgeGroupType::infer(&group.edges);
    if group.group_type != inferred {
        entry.insert(
            "edgeType".to_string(),
            Value::from(edge_type_name(group.group_type)),
        );
    }
    if let Some(target) = &group.default_target_step_id {
        entry.insert("defaultTarget".to_string(), Value::from(target.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workflow_engine::{StepKind, WorkflowBuilder};

    #[test]
    fn test_document_shape() {
        let wf = WorkflowBuilder::new("greeter", "Greeter")
            .add_step("greet", StepKind::SendMessage)
            .with_config_value("message", "Hello")
            .add_step("done", StepKind::EndWorkflow)
            .connect("greet", "done")
            .build();
        let doc = encode(&wf).unwrap();

        assert_eq!(
            doc,
            json!({
                "kind": "Workflow",
                "id": "greeter",
                "name": "Greeter",
                "startStep": "greet",
                "steps": [
                    {"id": "greet", "kind": "SendActivity", "activity": "Hello",
                     "edges": [{"targetId": "done"}]},
                    {"id": "done", "kind": "EndWorkflow"}
                ]
            })
        );
    }

    #[test]
    fn test_edge_type_only_when_not_inferable() {
        let wf = WorkflowBuilder::new("wf", "Types")
            .add_step("a", StepKind::SendMessage)
            .add_step("b", StepKind::SendMessage)
            .add_step("c", StepKind::EndWorkflow)
            .connect("a", "c")
            .connect("b", "c")
            .edge_type("b", EdgeGroupType::FanIn)
            .build();
        let doc = encode(&wf).unwrap();
        assert!(doc["steps"][0].get("edgeType").is_none());
        assert_eq!(doc["steps"][1]["edgeType"], json!("FanIn"));
    }

    #[test]
    fn test_default_target_without_edges() {
        let wf = WorkflowBuilder::new("wf", "Fallback")
            .add_step("route", StepKind::ConditionGroup)
            .add_step("end", StepKind::EndWorkflow)
            .default_target("route", "end")
            .edge_type("route", EdgeGroupType::SwitchCase)
            .build();
        let doc = encode(&wf).unwrap();
        let route = &doc["steps"][0];
        assert!(route.get("edges").is_none());
        assert_eq!(route["defaultTarget"], json!("end"));
        assert_eq!(route["edgeType"], json!("SwitchCase"));
    }
}
