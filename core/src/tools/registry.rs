use super::error::{ToolError, ToolResult};
use super::traits::Tool;
use crate::model::ToolCallRequest;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tool invocation timeout; a hung or slow handler must not stall the turn loop.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Registry of invocable tools, keyed by name.
///
/// `execute` never returns an `Err` to the caller: any failure mode is rendered as the
/// literal string the model is expected to read and react to, matching the contract the
/// orchestrator's turn loop relies on for feeding `tool` messages back to the LLM.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(DashMap::new()),
        }
    }

    /// Register a tool, replacing any existing tool of the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        info!(target: "tool_registry", tool = %name, "registering tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.clone())
    }

    /// JSON Schemas for every registered tool, in the shape an LLM tool-calling API expects.
    pub fn tool_schemas(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|entry| {
                let tool = entry.value();
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Execute a reassembled tool call request, always yielding the string to feed back
    /// into the next LLM step as the `tool` message content.
    #[tracing::instrument(skip(self, request), fields(tool.name = %request.name))]
    pub async fn execute(&self, request: &ToolCallRequest) -> String {
        let arguments: serde_json::Value = match serde_json::from_str(&request.arguments) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "tool_registry", tool = %request.name, %err, "invalid json arguments");
                return "Error: Invalid JSON arguments provided by model.".to_string();
            }
        };

        let tool = match self.get(&request.name) {
            Some(t) => t,
            None => {
                warn!(target: "tool_registry", tool = %request.name, "tool not found");
                return format!(
                    "Error: Missing or invalid arguments. Details: unknown tool '{}'",
                    request.name
                );
            }
        };

        if let Err(diagnostics) = validate_arguments(&tool.parameters(), &arguments) {
            return format!("Error: Missing or invalid arguments. Details: {diagnostics}");
        }

        debug!(target: "tool_registry", tool = %request.name, "invoking tool");
        match timeout(TOOL_CALL_TIMEOUT, tool.call(arguments)).await {
            Ok(Ok(value)) => match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
            Ok(Err(ToolError::InvalidArguments(diagnostics))) => {
                format!("Error: Missing or invalid arguments. Details: {diagnostics}")
            }
            Ok(Err(err)) => {
                warn!(target: "tool_registry", tool = %request.name, %err, "tool execution failed");
                "Error: Internal tool failure.".to_string()
            }
            Err(_) => {
                warn!(target: "tool_registry", tool = %request.name, "tool execution timed out");
                "Error: The tool took too long to respond.".to_string()
            }
        }
    }
}

/// Minimal JSON-Schema-shaped validation: every name in `required` must be present in
/// `arguments`, and `properties` whose schema declares a `type` must match it. This is not
/// a general-purpose validator, only enough to cover the flat string/number tool schemas
/// this registry serves.
fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Result<(), String> {
    let Some(obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required {
            let Some(name) = name.as_str() else { continue };
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in properties {
            let Some(value) = obj.get(name) else {
                continue;
            };
            let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected_type {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !matches {
                return Err(format!("field '{name}' must be of type {expected_type}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::calendar::{book_appointment_tool, check_calendar_availability_tool};

    fn registry_with_defaults() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.register(check_calendar_availability_tool());
        registry.register(book_appointment_tool());
        registry
    }

    #[tokio::test]
    async fn invalid_json_arguments_returns_literal_error() {
        let registry = registry_with_defaults();
        let request = ToolCallRequest {
            id: "call_1".to_string(),
            name: "check_calendar_availability".to_string(),
            arguments: "{not json".to_string(),
        };
        let result = registry.execute(&request).await;
        assert_eq!(result, "Error: Invalid JSON arguments provided by model.");
    }

    #[tokio::test]
    async fn missing_required_field_is_reported() {
        let registry = registry_with_defaults();
        let request = ToolCallRequest {
            id: "call_1".to_string(),
            name: "check_calendar_availability".to_string(),
            arguments: serde_json::json!({"date": "2025-01-14"}).to_string(),
        };
        let result = registry.execute(&request).await;
        assert!(result.starts_with("Error: Missing or invalid arguments."));
        assert!(result.contains("time"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_invalid_arguments() {
        let registry = registry_with_defaults();
        let request = ToolCallRequest {
            id: "call_1".to_string(),
            name: "does_not_exist".to_string(),
            arguments: "{}".to_string(),
        };
        let result = registry.execute(&request).await;
        assert!(result.starts_with("Error: Missing or invalid arguments."));
    }

    #[tokio::test]
    async fn successful_call_returns_handler_output() {
        let registry = registry_with_defaults();
        let request = ToolCallRequest {
            id: "call_1".to_string(),
            name: "check_calendar_availability".to_string(),
            arguments: serde_json::json!({"date": "2025-01-14", "time": "11:00"}).to_string(),
        };
        let result = registry.execute(&request).await;
        assert_eq!(result, "true");
    }
}
