//! Server configuration: the user-provided, persisted shape described in
//! §3 and the external config-file format in §6.
//!
//! Grounded on the teacher's `config.rs`, adapted from TOML to the JSON
//! format the spec's server-config file and manifest both use.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::permission::PermissionRule;

/// Transport kind for a server. Only `Stdio` is implemented by this crate;
/// `Http` is accepted in config for forward compatibility with a future
/// transport (§1, "Out of scope": HTTP transport).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Spawn a child process and speak MCP over its stdio.
    #[default]
    Stdio,
    /// Reserved for a future HTTP transport.
    Http,
}

fn default_true() -> bool {
    true
}

/// Configuration for a single MCP server (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name.
    pub name: String,
    /// Command to run (stdio transport).
    pub command: String,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables merged over the host environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Transport kind.
    #[serde(default)]
    pub transport: Transport,
    /// Whether to start this server automatically (default `true`).
    #[serde(rename = "autoStart", default = "default_true")]
    pub auto_start: bool,
    /// Permission rules evaluated by the tool router's guard.
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
}

impl ServerConfig {
    /// Build a minimal stdio server config.
    #[must_use]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            transport: Transport::Stdio,
            auto_start: true,
            permissions: Vec::new(),
        }
    }

    /// Append arguments, builder-style.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set an environment variable, builder-style.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Append a permission rule, builder-style.
    #[must_use]
    pub fn with_permission(mut self, rule: PermissionRule) -> Self {
        self.permissions.push(rule);
        self
    }

    /// Set `auto_start`, builder-style.
    #[must_use]
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

/// The external, optional server-config file format (§6): `{"servers":
/// [ServerConfig, ...]}`. A file missing the `servers` array is rejected.
#[derive(Debug, Clone, Deserialize)]
struct ServerConfigFileRaw {
    #[serde(default)]
    servers: Option<Vec<ServerConfig>>,
}

/// Parse a server-config file's contents (§6).
///
/// # Errors
///
/// Returns [`ManifestError::InvalidConfigFile`] if the JSON is malformed or
/// the top-level `servers` array is absent.
pub fn parse_server_config_file(path: &str, content: &str) -> Result<Vec<ServerConfig>, ManifestError> {
    let raw: ServerConfigFileRaw =
        serde_json::from_str(content).map_err(|e| ManifestError::InvalidConfigFile {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
    raw.servers.ok_or_else(|| ManifestError::InvalidConfigFile {
        path: path.to_string(),
        detail: "missing \"servers\" array".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_builder_has_expected_defaults() {
        let config = ServerConfig::stdio("fs", "npx").with_args(["-y", "mcp-fs"]);
        assert_eq!(config.name, "fs");
        assert_eq!(config.transport, Transport::Stdio);
        assert!(config.auto_start);
        assert_eq!(config.args, vec!["-y".to_string(), "mcp-fs".to_string()]);
    }

    #[test]
    fn parse_config_file_defaults_transport_and_auto_start() {
        let content = r#"{"servers": [{"name": "fs", "command": "npx"}]}"#;
        let servers = parse_server_config_file("servers.json", content).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].transport, Transport::Stdio);
        assert!(servers[0].auto_start);
    }

    #[test]
    fn parse_config_file_rejects_missing_servers_array() {
        let content = r#"{"notservers": []}"#;
        let err = parse_server_config_file("servers.json", content).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidConfigFile { .. }));
    }

    #[test]
    fn parse_config_file_rejects_malformed_json() {
        let err = parse_server_config_file("servers.json", "{not json").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidConfigFile { .. }));
    }
}
