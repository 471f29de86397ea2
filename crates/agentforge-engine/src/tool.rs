//! C3 — Tool registry & filter: canonical tool specs and per-call validation.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::CoreError;
use crate::types::{FunctionDef, ToolCall, ToolDefinition};

/// Canonical tool specifications the core recognizes. Arguments and execution
/// live on the (out-of-scope) tool executor; the core only validates shape.
static TOOL_SPECS: LazyLock<HashMap<&'static str, ToolDefinition>> = LazyLock::new(|| {
    let specs = [
        ("read_file", "Read a file's contents.", serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        })),
        ("write_file", "Write contents to a file.", serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" }, "content": { "type": "string" } },
            "required": ["path", "content"],
        })),
        ("delete_file", "Delete a file.", serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        })),
        ("move_file", "Move or rename a file.", serde_json::json!({
            "type": "object",
            "properties": { "from": { "type": "string" }, "to": { "type": "string" } },
            "required": ["from", "to"],
        })),
        ("list_files", "List files under a directory.", serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        })),
        ("search", "Search file contents.", serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })),
        ("run_command", "Execute a shell command.", serde_json::json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
        })),
        ("create_plan", "Propose a dependency-ordered subtask plan.", serde_json::json!({
            "type": "object",
            "properties": {
                "goal": { "type": "string" },
                "subtasks": { "type": "array" },
            },
            "required": ["goal", "subtasks"],
        })),
        ("switch_mode", "Request a switch to a different agent.", serde_json::json!({
            "type": "object",
            "properties": { "target_agent": { "type": "string" }, "reason": { "type": "string" } },
            "required": ["target_agent"],
        })),
    ];
    specs
        .into_iter()
        .map(|(name, description, parameters)| {
            (
                name,
                ToolDefinition {
                    tool_type: "function".to_string(),
                    function: FunctionDef {
                        name: name.to_string(),
                        description: description.to_string(),
                        parameters,
                    },
                },
            )
        })
        .collect()
});

pub fn get(name: &str) -> Option<&'static ToolDefinition> {
    TOOL_SPECS.get(name)
}

pub fn all() -> Vec<&'static ToolDefinition> {
    TOOL_SPECS.values().collect()
}

/// Filter the full spec set down to `allowedTools` (§4.C3). `None` means "all".
/// Unknown names in `allowed` produce a warning but do not fail filtering.
pub fn filter(allowed: Option<&[&str]>) -> Vec<ToolDefinition> {
    match allowed {
        None => TOOL_SPECS.values().cloned().collect(),
        Some(names) => {
            let mut out = Vec::new();
            for name in names {
                match TOOL_SPECS.get(name) {
                    Some(spec) => out.push(spec.clone()),
                    None => tracing::warn!(tool_name = %name, "allowed_tools references unknown tool"),
                }
            }
            out
        }
    }
}

/// Validate a tool call's arguments against its spec: tool exists, required
/// fields present, arguments parse as a JSON object.
pub fn validate_call(call: &ToolCall) -> Result<(), CoreError> {
    let spec = get(&call.function.name)
        .ok_or_else(|| CoreError::InvalidToolCall(format!("unknown tool: {}", call.function.name)))?;

    let args: serde_json::Value = serde_json::from_str(&call.function.arguments)
        .map_err(|e| CoreError::InvalidToolCall(format!("arguments not valid JSON: {}", e)))?;

    let required = spec
        .function
        .parameters
        .get("required")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for field in required {
        let Some(field_name) = field.as_str() else { continue };
        if args.get(field_name).is_none() {
            return Err(CoreError::InvalidToolCall(format!(
                "missing required field '{}' for tool {}",
                field_name, call.function.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCall;

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: "call-1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall { name: name.to_string(), arguments: args.to_string() },
        }
    }

    #[test]
    fn unknown_tool_name_filtered_with_warning_not_error() {
        let filtered = filter(Some(&["read_file", "no_such_tool"]));
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn validate_call_requires_fields() {
        let c = call("write_file", r#"{"path": "a.txt"}"#);
        let err = validate_call(&c).unwrap_err();
        assert!(matches!(err, CoreError::InvalidToolCall(_)));

        let c = call("write_file", r#"{"path": "a.txt", "content": "hi"}"#);
        assert!(validate_call(&c).is_ok());
    }
}
