//! Tool Invoker
//!
//! Dispatches a single tool call to the provider session. No schema
//! validation and no retries: tool side effects are not assumed safe to
//! repeat.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::catalog::{CatalogSnapshot, ToolOutput, ToolProvider};
use crate::error::InvocationError;

/// Runs tool calls against a provider session
#[derive(Clone)]
pub struct ToolInvoker {
    provider: Arc<dyn ToolProvider>,
}

impl ToolInvoker {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self { provider }
    }

    /// Invoke `tool_name` with the model's raw argument text.
    ///
    /// `snapshot` must be the catalog listed for the current turn.
    pub async fn invoke(
        &self,
        snapshot: &CatalogSnapshot,
        tool_name: &str,
        arguments: &str,
    ) -> Result<ToolOutput, InvocationError> {
        if !snapshot.contains(tool_name) {
            return Err(InvocationError::UnknownTool(tool_name.to_string()));
        }

        let arguments = parse_arguments(tool_name, arguments)?;

        tracing::debug!(tool = %tool_name, "Invoking tool");
        let output = self.provider.call_tool(tool_name, arguments).await?;

        if output.is_error {
            return Err(InvocationError::ProviderError {
                tool: tool_name.to_string(),
                message: output.render(),
            });
        }
        Ok(output)
    }
}

/// Models sometimes send an empty string for tools that take no arguments.
fn parse_arguments(tool_name: &str, raw: &str) -> Result<Map<String, Value>, InvocationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(InvocationError::MalformedArguments {
            tool: tool_name.to_string(),
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(InvocationError::MalformedArguments {
            tool: tool_name.to_string(),
            reason: e.to_string(),
        }),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
