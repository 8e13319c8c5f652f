//! Server manager: lifecycle of many (config → [`McpClient`]) pairs (§4.8).
//!
//! Grounded on the teacher's `ServerManager` (spawn/connect/stop bookkeeping
//! in `server.rs`'s shape, inferred from `client.rs`'s calls into it) but
//! driving our own [`StdioTransport`]/[`McpClient`] rather than `rmcp`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::client::McpClient;
use crate::config::ServerConfig;
use crate::error::{ManagerError, ProtocolError};
use crate::secrets::SecretProvider;
use crate::transport::StdioTransport;
use crate::types::ServerInfo;

/// A server's lifecycle state (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Not currently managed.
    Stopped,
    /// Spawn and handshake in progress.
    Starting,
    /// Spawned, handshake complete, usable.
    Running,
    /// Startup failed; the slot is evicted after being reported once.
    Error,
}

/// Observable state for one server (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerState {
    /// Server name.
    pub name: String,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// Child process id, when running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Capabilities advertised at handshake time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    /// Server identity from the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// Number of tools discovered at startup.
    pub tool_count: usize,
    /// When the server entered `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Failure message, when `status == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerState {
    fn starting(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ServerStatus::Starting,
            pid: None,
            capabilities: None,
            server_info: None,
            tool_count: 0,
            started_at: None,
            error: None,
        }
    }
}

struct ManagedServer {
    client: Arc<RwLock<McpClient>>,
    state: ServerState,
    /// Remembered so `restart` can re-spawn without the caller supplying the
    /// config again (§4.8).
    config: ServerConfig,
}

#[derive(Default)]
struct StateChangeBroadcaster {
    senders: Vec<mpsc::UnboundedSender<ServerState>>,
}

impl StateChangeBroadcaster {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ServerState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    fn emit(&mut self, state: ServerState) {
        self.senders.retain(|tx| tx.send(state.clone()).is_ok());
    }
}

/// Supervises a fleet of named MCP servers, one [`McpClient`] each.
pub struct ServerManager {
    active: Mutex<HashMap<String, ManagedServer>>,
    /// Serializes start/stop/restart mutations per manager instance, per
    /// the resolved Open Question on concurrent lifecycle ops (§9).
    mutation_lock: Mutex<()>,
    subscribers: Mutex<StateChangeBroadcaster>,
    secrets: SecretProvider,
}

impl Default for ServerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerManager {
    /// A manager with no secrets harvested.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            mutation_lock: Mutex::new(()),
            subscribers: Mutex::new(StateChangeBroadcaster::default()),
            secrets: SecretProvider::new(),
        }
    }

    /// A manager using the given secret provider to build child
    /// environments.
    #[must_use]
    pub fn with_secrets(secrets: SecretProvider) -> Self {
        Self {
            secrets,
            ..Self::new()
        }
    }

    /// Subscribe to state-change events; every transition is delivered as
    /// an owned snapshot (§4.8 "Handlers receive a defensive copy").
    pub async fn on_state_change(&self) -> mpsc::UnboundedReceiver<ServerState> {
        self.subscribers.lock().await.subscribe()
    }

    async fn emit(&self, state: ServerState) {
        self.subscribers.lock().await.emit(state);
    }

    /// Start a server: spawn, run the handshake, and probe its tools
    /// (§4.8).
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::AlreadyRunning`] if a server of this name is
    /// already running, or [`ManagerError::StartupFailed`] if the spawn or
    /// handshake fails.
    pub async fn start(&self, config: ServerConfig) -> Result<(), ManagerError> {
        let _guard = self.mutation_lock.lock().await;
        let name = config.name.clone();

        {
            let active = self.active.lock().await;
            if let Some(existing) = active.get(&name) {
                if existing.state.status == ServerStatus::Running {
                    return Err(ManagerError::AlreadyRunning(name));
                }
            }
        }

        let starting_state = ServerState::starting(&name);
        self.emit(starting_state.clone()).await;
        {
            let mut active = self.active.lock().await;
            active.insert(
                name.clone(),
                ManagedServer {
                    client: Arc::new(RwLock::new(McpClient::new(&name))),
                    state: starting_state,
                    config: config.clone(),
                },
            );
        }

        match self.spawn_and_probe(&config).await {
            Ok((client, state)) => {
                let mut active = self.active.lock().await;
                active.insert(
                    name.clone(),
                    ManagedServer { client, state: state.clone(), config: config.clone() },
                );
                drop(active);
                self.emit(state).await;
                Ok(())
            },
            Err(cause) => {
                let error_state = ServerState {
                    name: name.clone(),
                    status: ServerStatus::Error,
                    pid: None,
                    capabilities: None,
                    server_info: None,
                    tool_count: 0,
                    started_at: None,
                    error: Some(cause.to_string()),
                };
                self.active.lock().await.remove(&name);
                self.emit(error_state).await;
                Err(ManagerError::StartupFailed { name, cause: cause.to_string() })
            },
        }
    }

    async fn spawn_and_probe(
        &self,
        config: &ServerConfig,
    ) -> Result<(Arc<RwLock<McpClient>>, ServerState), ProtocolError> {
        let env = self.secrets.build_env(config);
        let transport = Arc::new(StdioTransport::new(
            config.command.clone(),
            config.args.clone(),
            env,
        ));

        let mut client = McpClient::new(&config.name);
        let handshake = client.connect_with_transport(transport).await?;
        let pid = client.pid().await;

        let mut state = ServerState {
            name: config.name.clone(),
            status: ServerStatus::Running,
            pid,
            capabilities: Some(handshake.capabilities),
            server_info: Some(handshake.server_info),
            tool_count: 0,
            started_at: Some(Utc::now()),
            error: None,
        };

        match client.list_tools(None).await {
            Ok(tools) => state.tool_count = tools.len(),
            Err(e) => {
                warn!(server = %config.name, error = %e, "failed to probe tools at startup, tool_count=0");
            },
        }

        info!(server = %config.name, pid, "server started");
        Ok((Arc::new(RwLock::new(client)), state))
    }

    /// Stop a server: best-effort disconnect, then evict.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFound`] if no such server is managed.
    pub async fn stop(&self, name: &str) -> Result<(), ManagerError> {
        let _guard = self.mutation_lock.lock().await;
        let managed = self.active.lock().await.remove(name);
        let Some(managed) = managed else {
            return Err(ManagerError::NotFound(name.to_string()));
        };

        managed.client.write().await.disconnect().await;

        let stopped_state = ServerState {
            name: name.to_string(),
            status: ServerStatus::Stopped,
            pid: None,
            capabilities: None,
            server_info: None,
            tool_count: 0,
            started_at: None,
            error: None,
        };
        self.emit(stopped_state).await;
        info!(server = name, "server stopped");
        Ok(())
    }

    /// Stop then start a server by name, reusing the config remembered from
    /// its original `start` (§4.8).
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotFound`] if no server of this name is
    /// currently managed, or an error if the subsequent `start` fails.
    /// Failure to stop an already-evicted server is ignored.
    pub async fn restart(&self, name: &str) -> Result<(), ManagerError> {
        let config = {
            let active = self.active.lock().await;
            active
                .get(name)
                .map(|m| m.config.clone())
                .ok_or_else(|| ManagerError::NotFound(name.to_string()))?
        };
        if self.stop(name).await.is_err() {
            // Not currently running; proceed straight to start.
        }
        self.start(config).await
    }

    /// Start every config, skipping `auto_start == false` entries (they are
    /// registered as `Stopped` without being spawned). Startup failures are
    /// recorded but do not abort the loop.
    pub async fn start_all(&self, configs: Vec<ServerConfig>) -> HashMap<String, ServerStatus> {
        let mut results = HashMap::new();
        for config in configs {
            let name = config.name.clone();
            if !config.auto_start {
                let stopped_state = ServerState {
                    name: name.clone(),
                    status: ServerStatus::Stopped,
                    pid: None,
                    capabilities: None,
                    server_info: None,
                    tool_count: 0,
                    started_at: None,
                    error: None,
                };
                self.active.lock().await.insert(
                    name.clone(),
                    ManagedServer {
                        client: Arc::new(RwLock::new(McpClient::new(&name))),
                        state: stopped_state,
                        config,
                    },
                );
                results.insert(name, ServerStatus::Stopped);
                continue;
            }
            match self.start(config).await {
                Ok(()) => {
                    results.insert(name, ServerStatus::Running);
                },
                Err(_) => {
                    results.insert(name, ServerStatus::Error);
                },
            }
        }
        results
    }

    /// Stop every known server concurrently. Individual failures do not
    /// abort the rest.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.active.lock().await.keys().cloned().collect();
        let stops = names.into_iter().map(|name| async move {
            if let Err(e) = self.stop(&name).await {
                warn!(server = %name, error = %e, "failed to stop server during stop_all");
            }
        });
        futures::future::join_all(stops).await;
    }

    /// A snapshot of every managed server's state.
    pub async fn list(&self) -> Vec<ServerState> {
        self.active.lock().await.values().map(|m| m.state.clone()).collect()
    }

    /// A single server's state snapshot.
    #[must_use = "query result should be used"]
    pub async fn get(&self, name: &str) -> Option<ServerState> {
        self.active.lock().await.get(name).map(|m| m.state.clone())
    }

    /// The live client for a running server, or `None` if not running.
    pub async fn get_client(&self, name: &str) -> Option<Arc<RwLock<McpClient>>> {
        let active = self.active.lock().await;
        let managed = active.get(name)?;
        if managed.state.status == ServerStatus::Running {
            Some(Arc::clone(&managed.client))
        } else {
            None
        }
    }

    /// Read-only accessor distinguishing `running` from any other status,
    /// for surfaces (like a CLI `list`) that only need a boolean.
    pub async fn server_state(&self, name: &str) -> Option<ServerStatus> {
        self.active.lock().await.get(name).map(|m| m.state.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_unknown_command_reports_error_and_evicts() {
        let manager = ServerManager::new();
        let config = ServerConfig::stdio("ghost", "this-binary-does-not-exist-xyz");
        let err = manager.start(config).await.unwrap_err();
        assert!(matches!(err, ManagerError::StartupFailed { .. }));
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_server_fails() {
        let manager = ServerManager::new();
        let err = manager.stop("ghost").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn start_all_registers_non_auto_start_servers_as_stopped() {
        let manager = ServerManager::new();
        let configs = vec![ServerConfig::stdio("lazy", "nonexistent-binary").auto_start(false)];
        let results = manager.start_all(configs).await;
        assert_eq!(results.get("lazy"), Some(&ServerStatus::Stopped));

        let state = manager.get("lazy").await.expect("registered as stopped");
        assert_eq!(state.status, ServerStatus::Stopped);
        assert_eq!(manager.server_state("lazy").await, Some(ServerStatus::Stopped));
    }

    #[tokio::test]
    async fn restart_unknown_server_fails() {
        let manager = ServerManager::new();
        let err = manager.restart("ghost").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn state_change_subscriber_observes_starting_then_error() {
        let manager = ServerManager::new();
        let mut rx = manager.on_state_change().await;
        let config = ServerConfig::stdio("ghost2", "this-binary-does-not-exist-xyz");
        let _ = manager.start(config).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, ServerStatus::Starting);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, ServerStatus::Error);
    }
}
