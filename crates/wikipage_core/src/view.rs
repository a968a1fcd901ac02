use anyhow::{Result, bail};
use serde_json::Value;

/// Renders a named template with bound variables.
pub trait ViewRenderer {
    fn render(&self, template: &str, vars: &Value) -> Result<String>;
}

/// Terminal-friendly renderer: a template banner followed by one
/// `key: value` line per variable, sorted by key. Null variables are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainView;

impl ViewRenderer for PlainView {
    fn render(&self, template: &str, vars: &Value) -> Result<String> {
        let Value::Object(map) = vars else {
            bail!("view variables for {template} must be an object");
        };
        let mut out = format!("== {template} ==\n");
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(text) => out.push_str(&format!("{key}: {text}\n")),
                Value::Array(items) => {
                    out.push_str(&format!("{key}:\n"));
                    for item in items {
                        out.push_str(&format!("  - {}\n", inline(item)));
                    }
                }
                other => out.push_str(&format!("{key}: {other}\n")),
            }
        }
        Ok(out)
    }
}

fn inline(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| format!("{key}={}", inline(value)))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}
