//! Shared MCP data types: tool definitions, call results, and the
//! handshake's `InitializeResult`.
//!
//! Resources and prompts are pass-through per spec: this layer forwards
//! their parameters and results as opaque JSON rather than modeling every
//! field (§1, "Out of scope").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{name, version}` identifying either end of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server (or client) name.
    pub name: String,
    /// Server (or client) version.
    pub version: String,
}

/// Result of the `initialize` handshake request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version echoed by the server.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Opaque capabilities object advertised by the server.
    #[serde(default)]
    pub capabilities: Value,
    /// Server identity.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// A tool exposed by one server, tagged with that server's name so callers
/// can tell tools with the same name on different servers apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within its server.
    pub name: String,
    /// Name of the server this tool came from.
    pub server: String,
    /// Human-readable description, if the server provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Parse a single entry of a `tools/list` result's `tools` array.
    #[must_use]
    pub fn from_wire(server: &str, value: &Value) -> Self {
        Self {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            server: server.to_string(),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_schema: value
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object"})),
        }
    }
}

/// Result of a `tools/call` invocation. `content` is forwarded verbatim;
/// `is_error` drives router success/failure bookkeeping (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Raw `content` array from the response.
    #[serde(default)]
    pub content: Value,
    /// Whether the server flagged this call as an error.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Parse a `tools/call` result payload.
    #[must_use]
    pub fn from_wire(value: Value) -> Self {
        let is_error = value
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = value.get("content").cloned().unwrap_or(Value::Null);
        Self { content, is_error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_from_wire_defaults_missing_fields() {
        let value = serde_json::json!({"name": "echo"});
        let tool = ToolDefinition::from_wire("srv", &value);
        assert_eq!(tool.name, "echo");
        assert_eq!(tool.server, "srv");
        assert!(tool.description.is_none());
        assert_eq!(tool.input_schema, serde_json::json!({"type": "object"}));
    }

    #[test]
    fn tool_call_result_detects_error_flag() {
        let value = serde_json::json!({"content": [{"type": "text", "text": "boom"}], "isError": true});
        let result = ToolCallResult::from_wire(value);
        assert!(result.is_error);
    }
}
