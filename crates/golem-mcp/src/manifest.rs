//! Manifest cache: in-memory registry of known servers mirrored to a JSON
//! file on disk (§4.4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::ManifestError;
use crate::types::ToolDefinition;

/// Manifest schema version written to disk.
pub const MANIFEST_VERSION: &str = "1.0";

/// Default manifest path, relative to the current working directory (§6).
pub const DEFAULT_MANIFEST_PATH: &str = ".golem/mcp-manifest.json";

/// Resolve the manifest path to use when none is given explicitly: the
/// literal `.golem/mcp-manifest.json` under the working directory always
/// wins when present, falling back to a `directories::ProjectDirs` data
/// directory otherwise (the way `astrid-core::dirs::AstridHome` resolves
/// `~/.astrid` when no project-local file exists).
#[must_use]
pub fn resolve_default_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_MANIFEST_PATH);
    if local.exists() {
        return local;
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "golem-mcp") {
        return dirs.data_dir().join("mcp-manifest.json");
    }
    local
}

/// A persisted record for one server (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The server's configuration.
    pub config: ServerConfig,
    /// Last-discovered capabilities object, opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    /// Last-discovered tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Last-discovered resources, opaque pass-through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Last-discovered prompts, opaque pass-through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    /// When any of the above was last refreshed. Accepts either an RFC 3339
    /// string or a Unix timestamp (seconds) on load, for forward
    /// compatibility with producers that emit the numeric form.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "lastDiscovered",
        deserialize_with = "deserialize_last_discovered"
    )]
    pub last_discovered: Option<DateTime<Utc>>,
}

fn deserialize_last_discovered<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Timestamp(String),
        UnixSeconds(i64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Timestamp(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(Raw::UnixSeconds(secs)) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("out-of-range unix timestamp")),
    }
}

impl ManifestEntry {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            capabilities: None,
            tools: None,
            resources: None,
            prompts: None,
            last_discovered: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestFile {
    version: String,
    #[serde(default)]
    servers: HashMap<String, ManifestEntry>,
}

impl Default for ManifestFile {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            servers: HashMap::new(),
        }
    }
}

/// In-memory registry of known servers, mirrored to a JSON file.
///
/// Insertion order (used by [`Self::all_tools`] and unqualified
/// [`Self::find_tool`] lookups) is tracked separately from the on-disk
/// representation, since a JSON object has no inherent order; reloading
/// from disk recovers a deterministic but not necessarily
/// insertion-preserving order (see DESIGN.md).
#[derive(Debug, Clone)]
pub struct Manifest {
    version: String,
    order: Vec<String>,
    servers: HashMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            order: Vec::new(),
            servers: HashMap::new(),
        }
    }
}

impl Manifest {
    /// An empty manifest at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`, returning a fresh empty manifest if the file is
    /// missing or malformed (§4.4, §8 boundary behaviors).
    #[must_use]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let Ok(content) = std::fs::read_to_string(path.as_ref()) else {
            return Self::default();
        };
        let Ok(file) = serde_json::from_str::<ManifestFile>(&content) else {
            return Self::default();
        };
        let order = file.servers.keys().cloned().collect();
        Self {
            version: file.version,
            order,
            servers: file.servers,
        }
    }

    /// Load from the default path, per [`resolve_default_path`].
    #[must_use]
    pub fn load_default() -> Self {
        Self::load(resolve_default_path())
    }

    /// Write the full manifest to `path`, pretty-printed, creating parent
    /// directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the file
    /// cannot be written, or serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = ManifestFile {
            version: self.version.clone(),
            servers: self.servers.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| ManifestError::InvalidConfigFile {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save to the default path.
    ///
    /// # Errors
    ///
    /// See [`Self::save`].
    pub fn save_default(&self) -> Result<(), ManifestError> {
        self.save(DEFAULT_MANIFEST_PATH)
    }

    /// The manifest's default path as a [`PathBuf`].
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_MANIFEST_PATH)
    }

    /// Insert or replace a server's configuration.
    pub fn add_server(&mut self, config: ServerConfig) {
        let name = config.name.clone();
        if !self.servers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.servers.insert(name, ManifestEntry::new(config));
    }

    /// Remove a server. Returns whether anything was removed.
    pub fn remove_server(&mut self, name: &str) -> bool {
        let removed = self.servers.remove(name).is_some();
        if removed {
            self.order.retain(|n| n != name);
        }
        removed
    }

    fn touch(entry: &mut ManifestEntry) {
        entry.last_discovered = Some(Utc::now());
    }

    /// Update a server's cached capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownServer`] if no such server exists.
    pub fn update_capabilities(&mut self, name: &str, capabilities: Value) -> Result<(), ManifestError> {
        let entry = self
            .servers
            .get_mut(name)
            .ok_or_else(|| ManifestError::UnknownServer(name.to_string()))?;
        entry.capabilities = Some(capabilities);
        Self::touch(entry);
        Ok(())
    }

    /// Update a server's cached tool list.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownServer`] if no such server exists.
    pub fn update_tools(&mut self, name: &str, tools: Vec<ToolDefinition>) -> Result<(), ManifestError> {
        let entry = self
            .servers
            .get_mut(name)
            .ok_or_else(|| ManifestError::UnknownServer(name.to_string()))?;
        entry.tools = Some(tools);
        Self::touch(entry);
        Ok(())
    }

    /// Update a server's cached resources.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownServer`] if no such server exists.
    pub fn update_resources(&mut self, name: &str, resources: Value) -> Result<(), ManifestError> {
        let entry = self
            .servers
            .get_mut(name)
            .ok_or_else(|| ManifestError::UnknownServer(name.to_string()))?;
        entry.resources = Some(resources);
        Self::touch(entry);
        Ok(())
    }

    /// Update a server's cached prompts.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnknownServer`] if no such server exists.
    pub fn update_prompts(&mut self, name: &str, prompts: Value) -> Result<(), ManifestError> {
        let entry = self
            .servers
            .get_mut(name)
            .ok_or_else(|| ManifestError::UnknownServer(name.to_string()))?;
        entry.prompts = Some(prompts);
        Self::touch(entry);
        Ok(())
    }

    /// Look up a server's entry.
    #[must_use]
    pub fn get_server(&self, name: &str) -> Option<&ManifestEntry> {
        self.servers.get(name)
    }

    /// List known server names in insertion order.
    #[must_use]
    pub fn list_servers(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Flatten every server's cached tools into `(server, tool)` pairs,
    /// preserving per-server insertion order.
    #[must_use]
    pub fn all_tools(&self) -> Vec<(String, ToolDefinition)> {
        self.order
            .iter()
            .filter_map(|name| self.servers.get(name))
            .flat_map(|entry| {
                entry
                    .tools
                    .iter()
                    .flatten()
                    .map(|t| (t.server.clone(), t.clone()))
            })
            .collect()
    }

    /// Resolve a tool name (§4.4). A name containing `.` is split at the
    /// first occurrence into `(server, tool)` and looked up directly;
    /// otherwise every server is scanned in insertion order for the first
    /// cached tool with a matching name.
    #[must_use]
    pub fn find_tool(&self, name: &str) -> Option<(String, ToolDefinition)> {
        if let Some((server, tool_name)) = name.split_once('.') {
            let entry = self.servers.get(server)?;
            let tool = entry.tools.as_ref()?.iter().find(|t| t.name == tool_name)?;
            return Some((server.to_string(), tool.clone()));
        }
        for server_name in &self.order {
            let Some(entry) = self.servers.get(server_name) else {
                continue;
            };
            if let Some(tools) = &entry.tools {
                if let Some(tool) = tools.iter().find(|t| t.name == name) {
                    return Some((server_name.clone(), tool.clone()));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            server: server.to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        }
    }

    #[test]
    fn loading_missing_file_yields_empty_manifest() {
        let manifest = Manifest::load("/nonexistent/path/manifest.json");
        assert_eq!(manifest.list_servers().len(), 0);
        assert_eq!(manifest.version, MANIFEST_VERSION);
    }

    #[test]
    fn loading_corrupt_file_yields_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{ not json at all").unwrap();
        let manifest = Manifest::load(&path);
        assert_eq!(manifest.list_servers().len(), 0);
    }

    #[test]
    fn last_discovered_accepts_unix_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","servers":{"s":{"config":{"name":"s","transport":"stdio","command":"echo","args":[],"env":{},"autoStart":true,"permissions":[]},"lastDiscovered":1700000000}}}"#,
        )
        .unwrap();
        let manifest = Manifest::load(&path);
        let entry = manifest.get_server("s").expect("server present");
        assert_eq!(
            entry.last_discovered,
            Some(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap())
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.json");

        let mut manifest = Manifest::new();
        manifest.add_server(ServerConfig::stdio("srv1", "cmd1"));
        manifest
            .update_tools("srv1", vec![tool("srv1", "echo")])
            .unwrap();
        manifest.save(&path).unwrap();

        let reloaded = Manifest::load(&path);
        assert_eq!(reloaded.list_servers(), vec!["srv1"]);
        assert_eq!(reloaded.get_server("srv1").unwrap().tools.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn update_rejects_unknown_server() {
        let mut manifest = Manifest::new();
        let err = manifest.update_tools("ghost", vec![]).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownServer(_)));
    }

    #[test]
    fn find_tool_qualified_and_unqualified() {
        let mut manifest = Manifest::new();
        manifest.add_server(ServerConfig::stdio("srv1", "cmd1"));
        manifest.add_server(ServerConfig::stdio("srv2", "cmd2"));
        manifest.update_tools("srv1", vec![tool("srv1", "echo")]).unwrap();
        manifest.update_tools("srv2", vec![tool("srv2", "add")]).unwrap();

        assert_eq!(
            manifest.find_tool("srv1.echo").map(|(s, t)| (s, t.name)),
            Some(("srv1".to_string(), "echo".to_string()))
        );
        assert_eq!(
            manifest.find_tool("add").map(|(s, t)| (s, t.name)),
            Some(("srv2".to_string(), "add".to_string()))
        );
        assert!(manifest.find_tool("srv1.add").is_none());
        assert!(manifest.find_tool("nonexistent").is_none());
    }

    #[test]
    fn all_tools_preserves_per_server_order() {
        let mut manifest = Manifest::new();
        manifest.add_server(ServerConfig::stdio("srv1", "cmd1"));
        manifest
            .update_tools("srv1", vec![tool("srv1", "a"), tool("srv1", "b")])
            .unwrap();
        let all = manifest.all_tools();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1.name, "a");
        assert_eq!(all[1].1.name, "b");
    }

    #[test]
    fn remove_server_reports_whether_anything_removed() {
        let mut manifest = Manifest::new();
        manifest.add_server(ServerConfig::stdio("srv1", "cmd1"));
        assert!(manifest.remove_server("srv1"));
        assert!(!manifest.remove_server("srv1"));
    }
}
