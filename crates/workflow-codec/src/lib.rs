//! Workflow Codec - textual import and export for workflow definitions
//!
//! Two YAML dialects are accepted on import and told apart by their
//! top-level keys:
//!
//! - **trigger/actions**: a single trigger with an ordered action list,
//!   imported as a linear chain
//! - **steps/edges**: every entry declares its own outgoing edges
//!
//! Export always writes the steps/edges dialect. JSON input is accepted
//! because it is valid YAML.
//!
//! # Example
//!
//! ```ignore
//! let definition = workflow_codec::import(&std::fs::read_to_string("triage.yaml")?)?;
//! let text = workflow_codec::export(&definition)?;
//! ```

mod dialect_actions;
mod dialect_graph;
mod encoder;
pub mod error;
pub mod fields;
pub mod layout;

use serde_json::Value;
use workflow_engine::WorkflowDefinition;

pub use error::{CodecError, Result};

/// The textual dialect of a workflow document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `trigger` with an ordered `actions` list
    TriggerActions,
    /// `steps` (or `executors`) with per-entry `edges`
    StepsEdges,
}

/// Parse the text and check the top-level discriminator
fn parse_document(text: &str) -> Result<(serde_json::Map<String, Value>, Dialect)> {
    let doc = match serde_yaml::from_str::<Value>(text)? {
        Value::Object(doc) => doc,
        other => return Err(CodecError::NotAWorkflow(describe(&other))),
    };

    match doc.get("kind") {
        Some(Value::String(kind)) if kind == "Workflow" => {}
        Some(other) => return Err(CodecError::NotAWorkflow(describe(other))),
        None => return Err(CodecError::NotAWorkflow(String::new())),
    }

    let dialect = if doc.contains_key("trigger") {
        Dialect::TriggerActions
    } else if doc.contains_key("steps") || doc.contains_key("executors") {
        Dialect::StepsEdges
    } else {
        return Err(CodecError::UnrecognizedStructure(
            "expected a 'trigger' or a 'steps' list".to_string(),
        ));
    };
    Ok((doc, dialect))
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identify the dialect of a document without importing it
pub fn detect_dialect(text: &str) -> Result<Dialect> {
    parse_document(text).map(|(_, dialect)| dialect)
}

/// Import a workflow from either dialect
///
/// The result is not validated; unknown step kinds are kept as custom
/// steps carrying their raw fields.
pub fn import(text: &str) -> Result<WorkflowDefinition> {
    let (doc, dialect) = parse_document(text)?;
    let definition = match dialect {
        Dialect::TriggerActions => dialect_actions::decode(&doc)?,
        Dialect::StepsEdges => dialect_graph::decode(&doc)?,
    };
    log::info!(
        "Imported workflow '{}' ({:?}, {} steps)",
        definition.id,
        dialect,
        definition.steps.len()
    );
    Ok(definition)
}

/// Export a workflow in the canonical steps/edges dialect
pub fn export(definition: &WorkflowDefinition) -> Result<String> {
    let doc = encoder::encode(definition)?;
    Ok(serde_yaml::to_string(&doc)?)
}

/// Serialize the graph model JSON shape
pub fn to_json(definition: &WorkflowDefinition) -> Result<String> {
    Ok(serde_json::to_string_pretty(definition)?)
}

/// Read the graph model JSON shape
pub fn from_json(text: &str) -> Result<WorkflowDefinition> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workflow_engine::{
        validate, EdgeGroupType, StepKind, Variable, VariableScope, VariableType, WorkflowBuilder,
    };

    const GRAPH_EXAMPLE: &str = r#"
kind: Workflow
id: triage
name: Support triage
maxIterations: 20
variables:
  - name: x
    type: string
    default: "0"
startStep: a
steps:
  - id: a
    kind: SetVariable
    variable: x
    value: "1"
    edges:
      - targetId: b
        condition: =${x} == 1
        label: one
      - targetId: c
  - id: b
    kind: SendActivity
    activity: matched ${x}
    edges:
      - targetId: c
    edgeType: FanIn
  - id: c
    kind: EndWorkflow
"#;

    fn rich_workflow() -> workflow_engine::WorkflowDefinition {
        WorkflowBuilder::new("rich", "Rich")
            .with_description("Everything at once")
            .max_iterations(40)
            .variable(Variable::new("topic", VariableType::String).with_default("rust"))
            .variable(Variable::new("count", VariableType::Number).with_scope(VariableScope::Global))
            .add_step("ask", StepKind::AgentInvoke)
            .with_name("Ask")
            .with_config_value("agentName", "helper")
            .with_config_value("instructionsTemplate", "Talk about ${topic}")
            .with_config_value("userInputTemplate", "=${input}")
            .add_step("route", StepKind::ConditionGroup)
            .with_config_value(
                "conditions",
                json!([{"expression": "=${count} > 1", "targetStepId": "many"}]),
            )
            .with_config_value("defaultTargetStepId", "one")
            .add_step("many", StepKind::ForEach)
            .with_config_value("items", "=items")
            .with_config_value("itemName", "item")
            .add_step("one", StepKind::SendMessage)
            .with_config_value("message", "just one")
            .disabled()
            .add_step("hook", StepKind::Custom("HttpRequest".to_string()))
            .with_config_value("url", "https://example.invalid")
            .add_step("done", StepKind::EndWorkflow)
            .connect("ask", "route")
            .connect_if("route", "many", "=${count} > 1")
            .default_target("route", "one")
            .connect("many", "hook")
            .connect("one", "hook")
            .edge_type("one", EdgeGroupType::FanIn)
            .connect("hook", "done")
            .build()
    }

    #[test]
    fn test_graph_dialect_example() {
        let wf = import(GRAPH_EXAMPLE).unwrap();
        assert_eq!(wf.id, "triage");
        assert_eq!(wf.name, "Support triage");
        assert_eq!(wf.max_iterations, Some(20));
        assert_eq!(wf.start_step_id, "a");

        let a = wf.edge_group("a").unwrap();
        assert_eq!(a.group_type, EdgeGroupType::SwitchCase);
        assert_eq!(a.edges[0].condition.as_deref(), Some("=${x} == 1"));
        assert_eq!(a.edges[1].condition, None);
        assert_eq!(wf.edge_group("b").unwrap().group_type, EdgeGroupType::FanIn);

        assert_eq!(wf.steps[0].config_str("variableName"), Some("x"));
        assert_eq!(wf.steps[0].config_str("value"), Some("1"));
        assert_eq!(wf.steps[1].config_str("message"), Some("matched ${x}"));
        assert!(validate(&wf).is_valid());
    }

    #[test]
    fn test_trigger_dialect() {
        let text = r#"
kind: Workflow
id: hello
trigger:
  kind: OnConversationStart
  actions:
    - kind: SendActivity
      id: greet
      activity: Hello ${name}
    - kind: Question
      prompt: Who are you?
      variable: who
"#;
        assert_eq!(detect_dialect(text).unwrap(), Dialect::TriggerActions);
        let wf = import(text).unwrap();
        assert_eq!(wf.start_step_id, "greet");
        assert_eq!(wf.steps[1].id, "action_2");
        assert_eq!(wf.steps[1].kind, StepKind::AskQuestion);
        assert_eq!(wf.steps[1].config_str("resultVariable"), Some("who"));
        assert_eq!(wf.outgoing_edges("greet")[0].target_step_id, "action_2");
    }

    #[test]
    fn test_json_input_is_accepted() {
        let text = r#"{"kind": "Workflow", "executors": [{"id": "only", "kind": "EndWorkflow"}]}"#;
        assert_eq!(detect_dialect(text).unwrap(), Dialect::StepsEdges);
        let wf = import(text).unwrap();
        assert_eq!(wf.start_step_id, "only");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(import("kind: [unclosed"), Err(CodecError::Yaml(_))));
        assert!(matches!(
            import("kind: Agent\nsteps: []"),
            Err(CodecError::NotAWorkflow(kind)) if kind == "Agent"
        ));
        assert!(matches!(import("steps: []"), Err(CodecError::NotAWorkflow(_))));
        assert!(matches!(import("- a\n- b"), Err(CodecError::NotAWorkflow(_))));
        assert!(matches!(
            import("kind: Workflow\nid: empty"),
            Err(CodecError::UnrecognizedStructure(_))
        ));
    }

    #[test]
    fn test_unknown_kind_survives_round_trip() {
        let text = r#"
kind: Workflow
steps:
  - id: hook
    kind: HttpRequest
    url: https://example.invalid
    retry:
      attempts: 3
"#;
        let wf = import(text).unwrap();
        assert_eq!(wf.steps[0].kind, StepKind::Custom("HttpRequest".to_string()));
        assert_eq!(wf.steps[0].config["retry"], json!({"attempts": 3}));

        let exported = export(&wf).unwrap();
        assert!(exported.contains("kind: HttpRequest"));
        assert!(exported.contains("attempts: 3"));
        assert!(import(&exported).unwrap().structurally_eq(&wf));
    }

    #[test]
    fn test_action_structural_names_survive_round_trip() {
        let text = r#"
kind: Workflow
id: hooks
trigger:
  kind: OnConversationStart
  actions:
    - kind: HttpRequest
      id: hook
      edges: [primary, backup]
      edgeType: fan-out
      defaultTarget: fallback
    - kind: EndWorkflow
      id: done
"#;
        let wf = import(text).unwrap();
        let hook = wf.find_step("hook").unwrap();
        assert_eq!(hook.config["edges"], json!(["primary", "backup"]));
        assert_eq!(hook.config_str("defaultTarget"), Some("fallback"));

        let exported = export(&wf).unwrap();
        let again = import(&exported).unwrap();
        assert!(again.structurally_eq(&wf));
        assert_eq!(again.find_step("hook").unwrap().config, hook.config);
        assert_eq!(again.outgoing_edges("hook")[0].target_step_id, "done");
        assert_eq!(export(&again).unwrap(), exported);
    }

    #[test]
    fn test_custom_kinds_named_like_dialect_kinds() {
        let wf = WorkflowBuilder::new("shadow", "Shadow")
            .add_step("jump", StepKind::Custom("Goto".to_string()))
            .with_config_value("actionId", "a")
            .add_step("ask", StepKind::Custom("Question".to_string()))
            .with_config_value("variable", "who")
            .add_step("say", StepKind::Custom("SendActivity".to_string()))
            .with_config_value("activity", "hi")
            .add_step("lower", StepKind::Custom("goto".to_string()))
            .add_step("prefixed", StepKind::Custom("custom:x".to_string()))
            .add_step("plain", StepKind::Custom("HttpRequest".to_string()))
            .connect("jump", "ask")
            .build();

        let text = export(&wf).unwrap();
        assert!(text.contains("custom:Goto"));
        assert!(text.contains("kind: HttpRequest"));
        let imported = import(&text).unwrap();
        assert!(imported.structurally_eq(&wf));

        let jump = imported.find_step("jump").unwrap();
        assert_eq!(jump.kind, StepKind::Custom("Goto".to_string()));
        assert_eq!(jump.config_str("actionId"), Some("a"));
        assert_eq!(jump.config_str("targetStepId"), None);
        assert_eq!(
            imported.find_step("ask").unwrap().config_str("variable"),
            Some("who")
        );
    }

    #[test]
    fn test_config_keys_shadowing_entry_keys() {
        let mut hook = WorkflowBuilder::new("shadow", "Shadow")
            .add_step("hook", StepKind::Custom("HttpRequest".to_string()))
            .with_name("Hook");
        for (key, value) in [
            ("description", json!("request body")),
            ("id", json!("remote-id")),
            ("kind", json!("POST")),
            ("displayName", json!("Remote")),
            ("disabled", json!(false)),
            ("edges", json!(["x"])),
            ("edgeType", json!("Single")),
            ("defaultTarget", json!("nowhere")),
            ("config", json!({"retries": 2})),
        ] {
            hook = hook.with_config_value(key, value);
        }
        let mut wf = hook
            .add_step("ask", StepKind::AgentInvoke)
            .with_config_value("agentName", "helper")
            .with_config_value("instructions", "not the template")
            .with_config_value("agent", json!({"name": "shadow", "version": 3}))
            .add_step("each", StepKind::ForEach)
            .with_config_value("items", "=list")
            .with_config_value("value", "raw")
            .add_step("route", StepKind::ConditionGroup)
            .with_config_value("elseGoto", "hook")
            .connect("hook", "ask")
            .connect("ask", "each")
            .connect("each", "route")
            .build();
        wf.steps[0].description = "Calls out".to_string();

        let text = export(&wf).unwrap();
        let imported = import(&text).unwrap();
        assert!(imported.structurally_eq(&wf));

        let back = imported.find_step("hook").unwrap();
        assert_eq!(back.name, "Hook");
        assert_eq!(back.description, "Calls out");
        assert!(!back.disabled);
        assert_eq!(back.config_str("description"), Some("request body"));
        assert_eq!(back.config["config"], json!({"retries": 2}));
        assert_eq!(imported.outgoing_edges("hook")[0].target_step_id, "ask");

        let ask = imported.find_step("ask").unwrap();
        assert_eq!(ask.config_str("agentName"), Some("helper"));
        assert_eq!(ask.config_str("instructionsTemplate"), None);
        assert_eq!(imported.find_step("each").unwrap().config_str("itemName"), None);
        assert_eq!(
            imported.find_step("route").unwrap().config_str("defaultTargetStepId"),
            None
        );
        assert_eq!(export(&imported).unwrap(), text);
    }

    #[test]
    fn test_model_round_trip() {
        let original = rich_workflow();
        let text = export(&original).unwrap();
        let imported = import(&text).unwrap();
        assert!(imported.structurally_eq(&original));

        let again = export(&imported).unwrap();
        assert_eq!(again, text);
    }

    #[test]
    fn test_text_round_trip() {
        let wf = import(GRAPH_EXAMPLE).unwrap();
        let exported = export(&wf).unwrap();
        let reimported = import(&exported).unwrap();
        assert!(reimported.structurally_eq(&wf));
        assert!(!exported.contains("position"));
        assert!(exported.contains("edgeType: FanIn"));
        assert_eq!(exported.matches("edgeType").count(), 1);
    }

    #[test]
    fn test_positions_are_recomputed() {
        let mut original = rich_workflow();
        for step in &mut original.steps {
            step.position = (9.0, 9.0);
        }
        let imported = import(&export(&original).unwrap()).unwrap();
        assert_eq!(imported.find_step("ask").unwrap().position, (0.0, 0.0));
        assert_eq!(imported.find_step("route").unwrap().position, (280.0, 0.0));
        assert!(imported.structurally_eq(&original));
    }

    #[test]
    fn test_empty_start_step_is_kept() {
        let text = "kind: Workflow\nstartStep: ''\nsteps:\n  - id: a\n";
        let wf = import(text).unwrap();
        assert_eq!(wf.start_step_id, "");
        assert!(!validate(&wf).is_valid());
    }

    #[test]
    fn test_json_shape_round_trip() {
        let original = rich_workflow();
        let json = to_json(&original).unwrap();
        assert!(json.contains("\"startStepId\": \"ask\""));
        let restored = from_json(&json).unwrap();
        assert_eq!(restored, original);
        assert!(matches!(from_json("{"), Err(CodecError::Json(_))));
    }
}
