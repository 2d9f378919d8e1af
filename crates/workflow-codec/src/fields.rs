//! Per-kind field mapping between dialect entries and step configs
//!
//! Both dialects describe a step as one flat object: common keys (`id`,
//! `kind`, `displayName`, `description`, `disabled`), dialect-specific
//! structural keys, and kind-specific fields. Kind-specific fields with a
//! known counterpart are renamed into the step config; everything else is
//! copied verbatim so unknown content survives a round trip.
//!
//! Config keys that would be read back as something else on import (a
//! common key, a structural key, a mapped field) are written under a nested
//! `config:` object instead. Custom kinds whose name a dialect would resolve
//! to a built-in kind are written as `custom:<name>`.

use serde_json::{Map, Value};
use workflow_engine::{Step, StepKind, Variable, WorkflowDefinition};

use crate::error::{CodecError, Result};

/// Keys every entry may carry regardless of kind
const COMMON_KEYS: [&str; 5] = ["id", "kind", "displayName", "description", "disabled"];

/// Entry key holding config keys that cannot be written flat
const ESCAPE_KEY: &str = "config";

/// Kind prefix marking a custom kind verbatim
const CUSTOM_PREFIX: &str = "custom:";

/// One kind-specific field
enum FieldMap {
    /// `dialect` (dotted for nested objects) maps to config key `config`
    Rename {
        dialect: &'static str,
        config: &'static str,
    },
    /// A list whose object items have their own key renames
    List {
        dialect: &'static str,
        config: &'static str,
        items: &'static [(&'static str, &'static str)],
    },
}

/// Dialect description of one step kind
struct KindSpec {
    /// Name written on export
    dialect: &'static str,
    /// Other names accepted on import
    aliases: &'static [&'static str],
    kind: StepKind,
    fields: &'static [FieldMap],
}

const fn rename(dialect: &'static str, config: &'static str) -> FieldMap {
    FieldMap::Rename { dialect, config }
}

static KINDS: [KindSpec; 12] = [
    KindSpec {
        dialect: "InvokeAzureAgent",
        aliases: &["InvokeAgent"],
        kind: StepKind::AgentInvoke,
        fields: &[
            rename("agent.name", "agentName"),
            rename("instructions", "instructionsTemplate"),
            rename("model", "model"),
            rename("input", "userInputTemplate"),
        ],
    },
    KindSpec {
        dialect: "SendActivity",
        aliases: &["SendMessage"],
        kind: StepKind::SendMessage,
        fields: &[rename("activity", "message")],
    },
    KindSpec {
        dialect: "SetVariable",
        aliases: &[],
        kind: StepKind::SetVariable,
        fields: &[rename("variable", "variableName"), rename("value", "value")],
    },
    KindSpec {
        dialect: "Question",
        aliases: &["AskQuestion"],
        kind: StepKind::AskQuestion,
        fields: &[rename("prompt", "prompt"), rename("variable", "resultVariable")],
    },
    KindSpec {
        dialect: "ConditionGroup",
        aliases: &[],
        kind: StepKind::ConditionGroup,
        fields: &[
            FieldMap::List {
                dialect: "conditions",
                config: "conditions",
                items: &[("condition", "expression"), ("goto", "targetStepId")],
            },
            rename("elseGoto", "defaultTargetStepId"),
        ],
    },
    KindSpec {
        dialect: "Foreach",
        aliases: &["ForEach"],
        kind: StepKind::ForEach,
        fields: &[
            rename("items", "items"),
            rename("value", "itemName"),
            rename("index", "indexName"),
        ],
    },
    KindSpec {
        dialect: "GotoAction",
        aliases: &["Goto"],
        kind: StepKind::Goto,
        fields: &[rename("actionId", "targetStepId")],
    },
    KindSpec {
        dialect: "EndWorkflow",
        aliases: &[],
        kind: StepKind::EndWorkflow,
        fields: &[],
    },
    KindSpec {
        dialect: "EndConversation",
        aliases: &[],
        kind: StepKind::EndConversation,
        fields: &[],
    },
    KindSpec {
        dialect: "CreateConversation",
        aliases: &[],
        kind: StepKind::CreateConversation,
        fields: &[rename("conversationId", "conversationIdVariable")],
    },
    KindSpec {
        dialect: "DeleteConversation",
        aliases: &[],
        kind: StepKind::DeleteConversation,
        fields: &[rename("conversationId", "conversationId")],
    },
    KindSpec {
        dialect: "CopyConversationMessages",
        aliases: &[],
        kind: StepKind::CopyMessages,
        fields: &[
            rename("conversationId", "targetConversationId"),
            rename("messages", "messages"),
        ],
    },
];

/// Resolve a dialect kind name
///
/// `custom:<name>` is always the custom kind `<name>`. Otherwise dialect
/// names and aliases come first, then the model's own kebab-case names.
/// Anything else is kept verbatim as a custom kind.
pub fn kind_from_dialect(name: &str) -> StepKind {
    if let Some(custom) = name.strip_prefix(CUSTOM_PREFIX) {
        return StepKind::Custom(custom.to_string());
    }
    KINDS
        .iter()
        .find(|spec| spec.dialect == name || spec.aliases.contains(&name))
        .map(|spec| spec.kind.clone())
        .unwrap_or_else(|| StepKind::from_name(name))
}

/// Dialect name written for a kind
///
/// A custom kind gets the `custom:` prefix when its bare name would not
/// import as the same custom kind.
pub fn dialect_name(kind: &StepKind) -> String {
    if let Some(spec) = spec_for(kind) {
        return spec.dialect.to_string();
    }
    match kind {
        StepKind::Custom(name) if kind_from_dialect(name) != *kind => {
            format!("{}{}", CUSTOM_PREFIX, name)
        }
        other => other.as_str().to_string(),
    }
}

fn spec_for(kind: &StepKind) -> Option<&'static KindSpec> {
    KINDS.iter().find(|spec| &spec.kind == kind)
}

// =============================================================================
// Scalars
// =============================================================================

/// Read an optional scalar as text; numbers and booleans are stringified
pub(crate) fn scalar_text(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(CodecError::invalid_field(field, "expected a scalar value")),
    }
}

fn bool_field(value: Option<&Value>, field: &str) -> Result<bool> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(CodecError::invalid_field(field, "expected true or false")),
    }
}

// =============================================================================
// Workflow header
// =============================================================================

/// Read the top-level fields shared by both dialects
pub(crate) fn read_header(doc: &Map<String, Value>, definition: &mut WorkflowDefinition) -> Result<()> {
    let id = scalar_text(doc.get("id"), "id")?;
    let name = scalar_text(doc.get("name"), "name")?;
    definition.id = id
        .clone()
        .or_else(|| name.clone())
        .unwrap_or_else(|| "workflow".to_string());
    definition.name = name.or(id).unwrap_or_else(|| definition.id.clone());
    definition.description = scalar_text(doc.get("description"), "description")?.unwrap_or_default();

    definition.max_iterations = match doc.get("maxIterations") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| CodecError::invalid_field("maxIterations", "expected a positive integer"))?,
        ),
    };

    if let Some(variables) = doc.get("variables").filter(|v| !v.is_null()) {
        definition.variables = serde_json::from_value::<Vec<Variable>>(variables.clone())
            .map_err(|e| CodecError::invalid_field("variables", e.to_string()))?;
    }

    definition.input_schema = doc.get("inputs").filter(|v| !v.is_null()).cloned();
    definition.output_schema = doc.get("outputs").filter(|v| !v.is_null()).cloned();
    Ok(())
}

/// Write the top-level fields shared by both dialects
pub(crate) fn write_header(definition: &WorkflowDefinition, doc: &mut Map<String, Value>) -> Result<()> {
    doc.insert("kind".to_string(), Value::from("Workflow"));
    doc.insert("id".to_string(), Value::from(definition.id.clone()));
    doc.insert("name".to_string(), Value::from(definition.name.clone()));
    if !definition.description.is_empty() {
        doc.insert(
            "description".to_string(),
            Value::from(definition.description.clone()),
        );
    }
    if let Some(max) = definition.max_iterations {
        doc.insert("maxIterations".to_string(), Value::from(max));
    }
    if !definition.variables.is_empty() {
        doc.insert(
            "variables".to_string(),
            serde_json::to_value(&definition.variables)?,
        );
    }
    if let Some(inputs) = &definition.input_schema {
        doc.insert("inputs".to_string(), inputs.clone());
    }
    if let Some(outputs) = &definition.output_schema {
        doc.insert("outputs".to_string(), outputs.clone());
    }
    Ok(())
}

// =============================================================================
// Steps
// =============================================================================

/// Build a step from a dialect entry
///
/// `reserved` lists the dialect's structural keys, which never reach the
/// config. An object under `config:` is merged into the config last.
pub(crate) fn decode_step(entry: &Map<String, Value>, id: String, reserved: &[&str]) -> Result<Step> {
    let kind_name = scalar_text(entry.get("kind"), "kind")?.unwrap_or_default();
    let kind = kind_from_dialect(&kind_name);

    let mut step = Step::new(id, kind);
    step.name = scalar_text(entry.get("displayName"), "displayName")?.unwrap_or_default();
    step.description = scalar_text(entry.get("description"), "description")?.unwrap_or_default();
    step.disabled = bool_field(entry.get("disabled"), "disabled")?;

    let mut bag: Map<String, Value> = entry
        .iter()
        .filter(|(key, _)| {
            let key = key.as_str();
            !COMMON_KEYS.contains(&key) && !reserved.contains(&key) && key != ESCAPE_KEY
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if let Some(spec) = spec_for(&step.kind) {
        for field in spec.fields {
            import_field(field, &mut bag, &mut step.config);
        }
    }
    step.config.extend(bag);

    match entry.get(ESCAPE_KEY) {
        None | Some(Value::Null) => {}
        Some(Value::Object(escaped)) => step
            .config
            .extend(escaped.iter().map(|(k, v)| (k.clone(), v.clone()))),
        Some(other) => {
            step.config.insert(ESCAPE_KEY.to_string(), other.clone());
        }
    }
    Ok(step)
}

fn import_field(field: &FieldMap, bag: &mut Map<String, Value>, config: &mut Map<String, Value>) {
    match field {
        FieldMap::Rename { dialect, config: key } => {
            if let Some(value) = take_path(bag, dialect) {
                config.insert(key.to_string(), value);
            }
        }
        FieldMap::List {
            dialect,
            config: key,
            items,
        } => {
            if let Some(value) = bag.remove(*dialect) {
                let renamed = items.iter().map(|(from, to)| (*from, *to)).collect::<Vec<_>>();
                config.insert(key.to_string(), rename_items(value, &renamed));
            }
        }
    }
}

/// Write a step as a dialect entry (without structural keys)
///
/// Config keys that [`decode_step`] would not read back as themselves go
/// under `config:`.
pub(crate) fn encode_step(step: &Step, reserved: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("id".to_string(), Value::from(step.id.clone()));
    let kind = dialect_name(&step.kind);
    if !kind.is_empty() {
        out.insert("kind".to_string(), Value::from(kind));
    }
    if !step.name.is_empty() {
        out.insert("displayName".to_string(), Value::from(step.name.clone()));
    }
    if !step.description.is_empty() {
        out.insert("description".to_string(), Value::from(step.description.clone()));
    }
    if step.disabled {
        out.insert("disabled".to_string(), Value::Bool(true));
    }

    let spec = spec_for(&step.kind);
    let mut config = step.config.clone();
    if let Some(spec) = spec {
        for field in spec.fields {
            export_field(field, &mut config, &mut out);
        }
    }

    let mut escaped = Map::new();
    for (key, value) in config {
        let must_escape = COMMON_KEYS.contains(&key.as_str())
            || reserved.contains(&key.as_str())
            || key == ESCAPE_KEY
            || spec.is_some_and(|spec| is_claimed(spec, &key, &value));
        if must_escape {
            escaped.insert(key, value);
            continue;
        }
        match out.get_mut(&key) {
            None => {
                out.insert(key, value);
            }
            Some(Value::Object(existing)) if merges_cleanly(existing, &value) => {
                if let Value::Object(extra) = value {
                    existing.extend(extra);
                }
            }
            Some(_) => {
                escaped.insert(key, value);
            }
        }
    }
    if !escaped.is_empty() {
        log::debug!(
            "Step '{}': {} config keys written under '{}'",
            step.id,
            escaped.len(),
            ESCAPE_KEY
        );
        out.insert(ESCAPE_KEY.to_string(), Value::Object(escaped));
    }
    out
}

/// A non-empty object whose keys are all absent from `existing`
fn merges_cleanly(existing: &Map<String, Value>, value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|extra| !extra.is_empty() && extra.keys().all(|k| !existing.contains_key(k)))
}

/// Whether a flat `key: value` would be consumed by one of the kind's mapped fields
fn is_claimed(spec: &KindSpec, key: &str, value: &Value) -> bool {
    spec.fields.iter().any(|field| match field {
        FieldMap::Rename { dialect, .. } => match dialect.split_once('.') {
            None => *dialect == key,
            Some((head, rest)) => {
                head == key
                    && value
                        .as_object()
                        .is_some_and(|map| map.is_empty() || has_path(map, rest))
            }
        },
        FieldMap::List { dialect, .. } => *dialect == key,
    })
}

fn has_path(map: &Map<String, Value>, path: &str) -> bool {
    match path.split_once('.') {
        None => map.contains_key(path),
        Some((head, rest)) => match map.get(head) {
            Some(Value::Object(child)) => has_path(child, rest),
            _ => false,
        },
    }
}

fn export_field(field: &FieldMap, config: &mut Map<String, Value>, out: &mut Map<String, Value>) {
    match field {
        FieldMap::Rename { dialect, config: key } => {
            if let Some(value) = config.remove(*key) {
                set_path(out, dialect, value);
            }
        }
        FieldMap::List {
            dialect,
            config: key,
            items,
        } => {
            if let Some(value) = config.remove(*key) {
                let renamed = items.iter().map(|(from, to)| (*to, *from)).collect::<Vec<_>>();
                out.insert(dialect.to_string(), rename_items(value, &renamed));
            }
        }
    }
}

/// Remove a possibly dotted path, dropping parents left empty
fn take_path(bag: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => bag.remove(path),
        Some((head, rest)) => {
            let Some(Value::Object(child)) = bag.get_mut(head) else {
                return None;
            };
            let value = take_path(child, rest);
            if child.is_empty() {
                bag.remove(head);
            }
            value
        }
    }
}

/// Insert at a possibly dotted path, creating parent objects
fn set_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

/// Rename keys of object items in a list; other shapes pass through
fn rename_items(value: Value, renames: &[(&str, &str)]) -> Value {
    let Value::Array(items) = value else {
        return value;
    };
    Value::Array(
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Value::Object(
                    map.into_iter()
                        .map(|(key, v)| {
                            let renamed = renames
                                .iter()
                                .find(|(from, _)| *from == key)
                                .map(|(_, to)| to.to_string())
                                .unwrap_or(key);
                            (renamed, v)
                        })
                        .collect(),
                ),
                other => other,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(kind_from_dialect("InvokeAzureAgent"), StepKind::AgentInvoke);
        assert_eq!(kind_from_dialect("InvokeAgent"), StepKind::AgentInvoke);
        assert_eq!(kind_from_dialect("Foreach"), StepKind::ForEach);
        assert_eq!(kind_from_dialect("send-message"), StepKind::SendMessage);
        assert_eq!(
            kind_from_dialect("HttpRequest"),
            StepKind::Custom("HttpRequest".to_string())
        );
        assert_eq!(dialect_name(&StepKind::CopyMessages), "CopyConversationMessages");
        assert_eq!(dialect_name(&StepKind::Custom("HttpRequest".to_string())), "HttpRequest");
    }

    #[test]
    fn test_custom_kind_named_like_builtin() {
        let custom = |name: &str| StepKind::Custom(name.to_string());
        assert_eq!(dialect_name(&custom("Goto")), "custom:Goto");
        assert_eq!(dialect_name(&custom("Question")), "custom:Question");
        assert_eq!(dialect_name(&custom("send-message")), "custom:send-message");
        assert_eq!(dialect_name(&custom("custom:x")), "custom:custom:x");
        assert_eq!(dialect_name(&custom("")), "");

        for name in ["Goto", "Question", "send-message", "custom:x", "HttpRequest"] {
            assert_eq!(kind_from_dialect(&dialect_name(&custom(name))), custom(name));
        }
        assert_eq!(kind_from_dialect("Goto"), StepKind::Goto);
    }

    #[test]
    fn test_agent_fields() {
        let raw = entry(json!({
            "id": "ask",
            "kind": "InvokeAzureAgent",
            "displayName": "Ask the agent",
            "agent": {"name": "helper", "version": 2},
            "instructions": "Be kind",
            "input": "=${input}",
            "temperature": 0.2
        }));
        let step = decode_step(&raw, "ask".to_string(), &[]).unwrap();
        assert_eq!(step.kind, StepKind::AgentInvoke);
        assert_eq!(step.name, "Ask the agent");
        assert_eq!(step.config_str("agentName"), Some("helper"));
        assert_eq!(step.config_str("instructionsTemplate"), Some("Be kind"));
        assert_eq!(step.config_str("userInputTemplate"), Some("=${input}"));
        assert_eq!(step.config["agent"], json!({"version": 2}));
        assert_eq!(step.config["temperature"], json!(0.2));

        let out = encode_step(&step, &[]);
        assert_eq!(out["agent"], json!({"name": "helper", "version": 2}));
        assert_eq!(out["instructions"], json!("Be kind"));
        assert_eq!(Value::Object(out), Value::Object(raw));
    }

    #[test]
    fn test_condition_items() {
        let raw = entry(json!({
            "id": "route",
            "kind": "ConditionGroup",
            "conditions": [
                {"id": "c1", "condition": "=${x} == 1", "goto": "one"},
                "not-an-object"
            ],
            "elseGoto": "other"
        }));
        let step = decode_step(&raw, "route".to_string(), &[]).unwrap();
        assert_eq!(
            step.config["conditions"][0],
            json!({"id": "c1", "expression": "=${x} == 1", "targetStepId": "one"})
        );
        assert_eq!(step.config["conditions"][1], json!("not-an-object"));
        assert_eq!(step.config_str("defaultTargetStepId"), Some("other"));

        assert_eq!(Value::Object(encode_step(&step, &[])), Value::Object(raw));
    }

    #[test]
    fn test_unknown_kind_keeps_field_bag() {
        let raw = entry(json!({
            "id": "hook",
            "kind": "HttpRequest",
            "url": "https://example.invalid",
            "headers": {"x": "y"}
        }));
        let step = decode_step(&raw, "hook".to_string(), &[]).unwrap();
        assert_eq!(step.kind, StepKind::Custom("HttpRequest".to_string()));
        assert_eq!(step.config.len(), 2);
        assert_eq!(Value::Object(encode_step(&step, &[])), Value::Object(raw));
    }

    #[test]
    fn test_colliding_config_keys_are_nested() {
        let mut step = Step::new("hook", StepKind::Custom("HttpRequest".to_string()));
        step.description = "Calls out".to_string();
        for (key, value) in [
            ("description", json!("payload text")),
            ("id", json!(7)),
            ("edges", json!(["primary", "backup"])),
            ("config", json!({"inner": true})),
            ("url", json!("https://example.invalid")),
        ] {
            step.config.insert(key.to_string(), value);
        }

        let out = encode_step(&step, &["edges"]);
        assert_eq!(out["description"], json!("Calls out"));
        assert_eq!(out["id"], json!("hook"));
        assert_eq!(out["url"], json!("https://example.invalid"));
        assert!(!out.contains_key("edges"));
        assert_eq!(
            out["config"],
            json!({
                "description": "payload text",
                "id": 7,
                "edges": ["primary", "backup"],
                "config": {"inner": true}
            })
        );

        let back = decode_step(&out, "hook".to_string(), &["edges"]).unwrap();
        assert_eq!(back.description, "Calls out");
        assert_eq!(back.config, step.config);
    }

    #[test]
    fn test_mapped_field_names_in_config_are_nested() {
        let mut step = Step::new("ask", StepKind::AgentInvoke);
        step.config.insert("agentName".to_string(), json!("helper"));
        step.config.insert("instructions".to_string(), json!("raw"));
        step.config.insert("agent".to_string(), json!({"name": "other"}));
        step.config.insert("tags".to_string(), json!({}));

        let out = encode_step(&step, &[]);
        assert_eq!(out["agent"], json!({"name": "helper"}));
        assert_eq!(out["tags"], json!({}));
        assert_eq!(
            out["config"],
            json!({"instructions": "raw", "agent": {"name": "other"}})
        );
        let back = decode_step(&out, "ask".to_string(), &[]).unwrap();
        assert_eq!(back.config, step.config);

        let mut each = Step::new("each", StepKind::ForEach);
        each.config.insert("value".to_string(), json!("x"));
        let out = encode_step(&each, &[]);
        assert!(!out.contains_key("value"));
        let back = decode_step(&out, "each".to_string(), &[]).unwrap();
        assert_eq!(back.config, each.config);
        assert_eq!(back.config_str("itemName"), None);
    }

    #[test]
    fn test_non_object_config_entry() {
        let raw = entry(json!({"id": "a", "kind": "HttpRequest", "config": "inline"}));
        let step = decode_step(&raw, "a".to_string(), &[]).unwrap();
        assert_eq!(step.config["config"], json!("inline"));
        let out = encode_step(&step, &[]);
        assert_eq!(out["config"], json!({"config": "inline"}));
    }

    #[test]
    fn test_reserved_keys_stay_out_of_config() {
        let raw = entry(json!({"id": "a", "kind": "EndWorkflow", "edges": [], "disabled": true}));
        let step = decode_step(&raw, "a".to_string(), &["edges"]).unwrap();
        assert!(step.config.is_empty());
        assert!(step.disabled);
    }

    #[test]
    fn test_bad_scalars() {
        let raw = entry(json!({"id": "a", "disabled": "yes"}));
        assert!(matches!(
            decode_step(&raw, "a".to_string(), &[]),
            Err(CodecError::InvalidField { .. })
        ));

        let raw = entry(json!({"id": "a", "displayName": ["x"]}));
        assert!(decode_step(&raw, "a".to_string(), &[]).is_err());
    }

    #[test]
    fn test_header() {
        let doc = entry(json!({
            "kind": "Workflow",
            "id": "triage",
            "maxIterations": 12,
            "variables": [{"name": "topic", "type": "string", "default": "rust"}],
            "inputs": {"type": "object"}
        }));
        let mut wf = WorkflowDefinition::new("", "");
        read_header(&doc, &mut wf).unwrap();
        assert_eq!(wf.id, "triage");
        assert_eq!(wf.name, "triage");
        assert_eq!(wf.max_iterations, Some(12));
        assert_eq!(wf.variables[0].default, Some(json!("rust")));
        assert!(wf.output_schema.is_none());

        let mut out = Map::new();
        write_header(&wf, &mut out).unwrap();
        assert_eq!(out["kind"], json!("Workflow"));
        assert_eq!(out["maxIterations"], json!(12));

        let bad = entry(json!({"maxIterations": -1}));
        assert!(read_header(&bad, &mut wf).is_err());
    }
}
