//! Template substitution and condition evaluation
//!
//! Four reference syntaxes are understood, in precedence order:
//!
//! 1. `=name` as the whole value
//! 2. `=${name}` embedded in text
//! 3. `${name}` embedded in text
//! 4. `$(name)` embedded in text
//!
//! Lookup tries the exact name, then the name with dots replaced by
//! underscores, then a case-insensitive match. A reference that does not
//! resolve is left exactly as written.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::context::render_value;

static WHOLE_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^=([A-Za-z0-9_.]+)$").expect("valid regex"));

// One alternation keeps the syntaxes in precedence order at each position and
// never rescans substituted text.
static EMBEDDED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"=\$\{([A-Za-z0-9_.]+)\}|\$\{([A-Za-z0-9_.]+)\}|\$\(([A-Za-z0-9_.]+)\)")
        .expect("valid regex")
});

/// Look up a variable by name with the fallback chain.
pub fn lookup<'a>(name: &str, vars: &'a HashMap<String, Value>) -> Option<&'a Value> {
    if let Some(value) = vars.get(name) {
        return Some(value);
    }

    let normalized = name.replace('.', "_");
    if let Some(value) = vars.get(&normalized) {
        return Some(value);
    }

    vars.iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name) || key.eq_ignore_ascii_case(&normalized))
        .min_by(|a, b| a.0.cmp(b.0))
        .map(|(_, value)| value)
}

/// Substitute every resolvable reference in `template`.
pub fn resolve(template: &str, vars: &HashMap<String, Value>) -> String {
    if let Some(caps) = WHOLE_VALUE.captures(template) {
        return match lookup(&caps[1], vars) {
            Some(value) => render_value(value),
            None => template.to_string(),
        };
    }

    EMBEDDED
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match lookup(name, vars) {
                Some(value) => render_value(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Resolve a config value.
///
/// A string that is exactly `=name` yields the variable's raw value, so
/// arrays and numbers survive assignment. Other strings are resolved as
/// templates; non-string values are returned as they are.
pub fn resolve_value(value: &Value, vars: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(template) => {
            if let Some(raw) = WHOLE_VALUE
                .captures(template)
                .and_then(|caps| lookup(&caps[1], vars))
            {
                return raw.clone();
            }
            Value::String(resolve(template, vars))
        }
        other => other.clone(),
    }
}

/// Evaluate a guard expression.
///
/// The expression is resolved first, trimmed and stripped of one leading
/// `=`. `true`/`false` (any case) are literal; `left == right` compares the
/// two sides as text with surrounding quotes removed. Anything else is true.
pub fn evaluate_condition(expr: &str, vars: &HashMap<String, Value>) -> bool {
    let resolved = resolve(expr, vars);
    let mut text = resolved.trim();
    if let Some(rest) = text.strip_prefix('=') {
        text = rest.trim();
    }

    if text.eq_ignore_ascii_case("true") {
        return true;
    }
    if text.eq_ignore_ascii_case("false") {
        return false;
    }

    if let Some((left, right)) = text.split_once("==") {
        if !right.contains("==") {
            return unquote(left.trim()) == unquote(right.trim());
        }
    }

    true
}

fn unquote(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}
