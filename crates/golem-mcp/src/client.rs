//! Client facade: the MCP operations a server manager hands callers once a
//! server is running (§4.3).
//!
//! Grounded on the teacher's `McpClient`, generalized from wrapping `rmcp`'s
//! peer handle to driving our own [`ProtocolEngine`] directly.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProtocolError;
use crate::protocol::ProtocolEngine;
use crate::transport::Transport;
use crate::types::{InitializeResult, ServerInfo, ToolCallResult, ToolDefinition};

const CLIENT_NAME: &str = "golem-mcp";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Thin wrapper around a [`ProtocolEngine`] exposing the MCP operations
/// relevant to a single running server.
pub struct McpClient {
    engine: Option<ProtocolEngine>,
    tool_cache: RwLock<Option<Vec<ToolDefinition>>>,
    server_name: String,
}

impl McpClient {
    /// Construct a client with no transport attached yet.
    #[must_use]
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            engine: None,
            tool_cache: RwLock::new(None),
            server_name: server_name.into(),
        }
    }

    /// Attach a transport, start it, and run the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to start or the handshake
    /// fails.
    pub async fn connect_with_transport(
        &mut self,
        transport: Arc<dyn Transport>,
    ) -> Result<InitializeResult, ProtocolError> {
        let engine = ProtocolEngine::new(transport);
        engine.connect().await?;
        let client_info = ServerInfo {
            name: CLIENT_NAME.to_string(),
            version: CLIENT_VERSION.to_string(),
        };
        let result = engine.initialize(client_info, serde_json::json!({})).await?;
        self.engine = Some(engine);
        Ok(result)
    }

    fn engine(&self) -> Result<&ProtocolEngine, ProtocolError> {
        self.engine.as_ref().ok_or(ProtocolError::NotInitialized)
    }

    /// Disconnect: best-effort MCP `shutdown`, then transport close.
    /// Invalidates the tool cache.
    pub async fn disconnect(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
            engine.close().await;
        }
        *self.tool_cache.write().await = None;
    }

    /// List tools, forwarding `cursor` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the engine is not
    /// connected.
    pub async fn list_tools(&self, cursor: Option<&str>) -> Result<Vec<ToolDefinition>, ProtocolError> {
        let params = cursor.map(|c| serde_json::json!({"cursor": c}));
        let result = self.engine()?.request("tools/list", params).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(tools
            .iter()
            .map(|t| ToolDefinition::from_wire(&self.server_name, t))
            .collect())
    }

    /// Lazily list and cache tools on first call; subsequent calls reuse
    /// the cache until [`Self::disconnect`] invalidates it.
    ///
    /// # Errors
    ///
    /// Returns an error if listing is needed and fails.
    pub async fn get_tool(&self, name: &str) -> Result<Option<ToolDefinition>, ProtocolError> {
        {
            let cache = self.tool_cache.read().await;
            if let Some(tools) = cache.as_ref() {
                return Ok(tools.iter().find(|t| t.name == name).cloned());
            }
        }
        let tools = self.list_tools(None).await?;
        let found = tools.iter().find(|t| t.name == name).cloned();
        *self.tool_cache.write().await = Some(tools);
        Ok(found)
    }

    /// Call a tool by name with optional JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not connected or the call fails.
    pub async fn call_tool(&self, name: &str, args: Option<Value>) -> Result<ToolCallResult, ProtocolError> {
        let mut params = serde_json::Map::new();
        params.insert("name".to_string(), Value::String(name.to_string()));
        if let Some(args) = args {
            params.insert("arguments".to_string(), args);
        }
        debug!(server = %self.server_name, tool = name, "calling tool");
        let result = self
            .engine()?
            .request("tools/call", Some(Value::Object(params)))
            .await?;
        Ok(ToolCallResult::from_wire(result))
    }

    /// List resources, forwarding `cursor` when given. Pass-through: the
    /// raw wire result is returned verbatim (§1).
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not connected or the call fails.
    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<Value, ProtocolError> {
        let params = cursor.map(|c| serde_json::json!({"cursor": c}));
        self.engine()?.request("resources/list", params).await
    }

    /// Read a resource by URI. Pass-through result.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not connected or the call fails.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, ProtocolError> {
        self.engine()?
            .request("resources/read", Some(serde_json::json!({"uri": uri})))
            .await
    }

    /// List prompts, forwarding `cursor` when given. Pass-through result.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not connected or the call fails.
    pub async fn list_prompts(&self, cursor: Option<&str>) -> Result<Value, ProtocolError> {
        let params = cursor.map(|c| serde_json::json!({"cursor": c}));
        self.engine()?.request("prompts/list", params).await
    }

    /// Get a prompt by name with optional arguments. Pass-through result.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not connected or the call fails.
    pub async fn get_prompt(&self, name: &str, args: Option<Value>) -> Result<Value, ProtocolError> {
        let mut params = serde_json::Map::new();
        params.insert("name".to_string(), Value::String(name.to_string()));
        if let Some(args) = args {
            params.insert("arguments".to_string(), args);
        }
        self.engine()?
            .request("prompts/get", Some(Value::Object(params)))
            .await
    }

    /// Register interest in a server-initiated notification method.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not connected.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<Value>, ProtocolError> {
        Ok(self.engine()?.on_notification(method).await)
    }

    /// Whether the handshake has completed.
    pub async fn is_initialized(&self) -> bool {
        match &self.engine {
            Some(engine) => engine.is_initialized().await,
            None => false,
        }
    }

    /// The underlying process id, if the transport exposes one.
    pub async fn pid(&self) -> Option<u32> {
        match &self.engine {
            Some(engine) => engine.pid().await,
            None => None,
        }
    }
}
