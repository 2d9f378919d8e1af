//! Trigger/actions dialect decoder
//!
//! One trigger owns an ordered action list; the graph is the linear chain
//! through those actions.

use std::collections::HashSet;

use serde_json::{Map, Value};
use workflow_engine::{Edge, EdgeGroup, EdgeGroupType, WorkflowDefinition};

use crate::error::{CodecError, Result};
use crate::fields::{decode_step, read_header, scalar_text};
use crate::layout;

/// Decode a document whose `trigger` key is present
pub(crate) fn decode(doc: &Map<String, Value>) -> Result<WorkflowDefinition> {
    let mut definition = WorkflowDefinition::new("", "");
    read_header(doc, &mut definition)?;

    let trigger = doc
        .get("trigger")
        .and_then(Value::as_object)
        .ok_or_else(|| CodecError::invalid_field("trigger", "expected an object"))?;
    let actions = match trigger.get("actions") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(CodecError::invalid_field("trigger.actions", "expected a list")),
    };

    let mut seen = HashSet::new();
    for (index, action) in actions.iter().enumerate() {
        let entry = action.as_object().ok_or_else(|| {
            CodecError::invalid_field(format!("trigger.actions[{}]", index), "expected an object")
        })?;
        let id = scalar_text(entry.get("id"), "id")?
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("action_{}", index + 1));
        if !seen.insert(id.clone()) {
            return Err(CodecError::DuplicateStep(id));
        }
        definition.steps.push(decode_step(entry, id, &[])?);
    }

    for pair in definition.steps.windows(2) {
        let source = &pair[0].id;
        let mut group = EdgeGroup::new(format!("{}-edges", source), source.as_str());
        group.group_type = EdgeGroupType::Single;
        group
            .edges
            .push(Edge::new(format!("{}-edges-0", source), pair[1].id.as_str()));
        definition.edge_groups.push(group);
    }

    definition.start_step_id = definition
        .steps
        .first()
        .map(|s| s.id.clone())
        .unwrap_or_default();
    layout::apply(&mut definition);

    log::debug!(
        "Decoded trigger/actions workflow '{}' with {} steps",
        definition.id,
        definition.steps.len()
    );
    Ok(definition)
}
