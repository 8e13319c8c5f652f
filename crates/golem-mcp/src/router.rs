//! Tool router: name resolution, permission checks, dispatch, and audit
//! recording for a single tool invocation (§4.9).

use std::time::Instant;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::audit::{AuditLog, InvocationResult};
use crate::error::{GolemMcpError, RouterError};
use crate::manager::ServerManager;
use crate::manifest::Manifest;
use crate::permission::{PermissionGuard, Scope};
use crate::types::{ToolCallResult, ToolDefinition};

/// Result of a successful [`ToolRouter::invoke`] call.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Server the tool was dispatched to.
    pub server: String,
    /// Tool name, unqualified.
    pub tool: String,
    /// The raw tool-call result.
    pub result: ToolCallResult,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
}

/// Resolves tool names, enforces permissions, dispatches through the
/// manager, and records every attempt to the audit log.
pub struct ToolRouter {
    manager: std::sync::Arc<ServerManager>,
    manifest: Mutex<Manifest>,
    guard: PermissionGuard,
    audit: Mutex<AuditLog>,
}

impl ToolRouter {
    /// Build a router over the given manager, manifest, and permission
    /// guard, with a fresh audit log.
    #[must_use]
    pub fn new(manager: std::sync::Arc<ServerManager>, manifest: Manifest, guard: PermissionGuard) -> Self {
        Self {
            manager,
            manifest: Mutex::new(manifest),
            guard,
            audit: Mutex::new(AuditLog::default()),
        }
    }

    /// Read-only access to the audit log's queries.
    pub async fn audit_recent(&self, count: Option<usize>) -> Vec<crate::audit::AuditEntry> {
        self.audit.lock().await.recent(count)
    }

    /// Audit entries for a single server.
    pub async fn audit_for_server(&self, name: &str) -> Vec<crate::audit::AuditEntry> {
        self.audit.lock().await.for_server(name)
    }

    /// Resolve a tool name to `(server, tool)` without checking
    /// permissions or running state (§4.9 step 1).
    async fn resolve(&self, qualified_name: &str) -> Result<(String, String), RouterError> {
        if let Some((server, tool)) = qualified_name.split_once('.') {
            return Ok((server.to_string(), tool.to_string()));
        }

        let manifest = self.manifest.lock().await;
        if let Some((server, tool)) = manifest.find_tool(qualified_name) {
            return Ok((server, tool.name));
        }

        Err(RouterError::ToolNotFound(qualified_name.to_string()))
    }

    /// Resolve, permission-check, dispatch, and audit a single tool call
    /// (§4.9).
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::ToolNotFound`] if no resolution strategy
    /// succeeds, [`RouterError::PermissionDenied`] if the guard denies the
    /// call (after recording a `deny` audit entry), or
    /// [`RouterError::ServerNotRunning`] if the resolved server has no live
    /// client.
    pub async fn invoke(&self, qualified_name: &str, args: Option<Value>) -> Result<InvocationOutcome, GolemMcpError> {
        let (server, tool) = self.resolve(qualified_name).await?;

        let decision = self.guard.check_tool(&tool, &[] as &[Scope]);
        if let crate::permission::Decision::Deny(reason) = decision {
            self.audit.lock().await.log_denial(&server, &tool, &reason);
            return Err(RouterError::PermissionDenied(reason).into());
        }

        let client = self
            .manager
            .get_client(&server)
            .await
            .ok_or_else(|| RouterError::ServerNotRunning(server.clone()))?;

        debug!(server = %server, tool = %tool, "dispatching tool call");
        let start = Instant::now();
        let call_result = client.read().await.call_tool(&tool, args.clone()).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match call_result {
            Ok(result) => {
                let outcome = if result.is_error {
                    InvocationResult::Failure
                } else {
                    InvocationResult::Success
                };
                self.audit
                    .lock()
                    .await
                    .log_invocation(&server, &tool, args, Some(outcome), Some(duration_ms));
                Ok(InvocationOutcome { server, tool, result, duration_ms })
            },
            Err(e) => {
                self.audit.lock().await.log_invocation(
                    &server,
                    &tool,
                    args,
                    Some(InvocationResult::Failure),
                    Some(duration_ms),
                );
                Err(e.into())
            },
        }
    }

    /// Refresh every running server's tool list into the manifest, and
    /// return the flattened set. Servers whose listing fails are skipped;
    /// their previously cached tools are left untouched.
    pub async fn list_all_tools(&self) -> Vec<ToolDefinition> {
        let servers = self.manager.list().await;
        let mut manifest = self.manifest.lock().await;
        let mut all = Vec::new();

        for state in servers {
            if state.status != crate::manager::ServerStatus::Running {
                continue;
            }
            let Some(client) = self.manager.get_client(&state.name).await else {
                continue;
            };
            match client.read().await.list_tools(None).await {
                Ok(tools) => {
                    all.extend(tools.iter().cloned());
                    if manifest.update_tools(&state.name, tools).is_err() {
                        debug!(server = %state.name, "tools refreshed for server not present in manifest");
                    }
                },
                Err(e) => {
                    debug!(server = %state.name, error = %e, "skipping tool listing failure");
                },
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::permission::PermissionRule;

    fn manifest_with_tool(server: &str, tool: &str) -> Manifest {
        let mut manifest = Manifest::new();
        manifest.add_server(ServerConfig::stdio(server, "unused"));
        manifest
            .update_tools(
                server,
                vec![ToolDefinition {
                    name: tool.to_string(),
                    server: server.to_string(),
                    description: None,
                    input_schema: serde_json::json!({}),
                }],
            )
            .unwrap();
        manifest
    }

    #[tokio::test]
    async fn invoke_fails_with_tool_not_found_when_unresolvable() {
        let manager = std::sync::Arc::new(ServerManager::new());
        let router = ToolRouter::new(manager, Manifest::new(), PermissionGuard::new());
        let err = router.invoke("nonexistent", None).await.unwrap_err();
        assert!(matches!(err, GolemMcpError::Router(RouterError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn invoke_denies_and_audits_blocked_tool() {
        let manager = std::sync::Arc::new(ServerManager::new());
        let manifest = manifest_with_tool("srv", "blocked");
        let guard = PermissionGuard::new().with_rules(vec![PermissionRule::deny("blocked")]);
        let router = ToolRouter::new(manager, manifest, guard);

        let err = router.invoke("blocked", None).await.unwrap_err();
        assert!(matches!(err, GolemMcpError::Router(RouterError::PermissionDenied(_))));

        let entries = router.audit_for_server("srv").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, crate::audit::AuditAction::Deny);
    }

    #[tokio::test]
    async fn invoke_fails_when_server_not_running() {
        let manager = std::sync::Arc::new(ServerManager::new());
        let manifest = manifest_with_tool("srv", "echo");
        let router = ToolRouter::new(manager, manifest, PermissionGuard::new());

        let err = router.invoke("srv.echo", None).await.unwrap_err();
        assert!(matches!(err, GolemMcpError::Router(RouterError::ServerNotRunning(_))));
    }

    #[tokio::test]
    async fn qualified_routing_matches_spec_scenario() {
        let manager = std::sync::Arc::new(ServerManager::new());
        let mut manifest = Manifest::new();
        manifest.add_server(ServerConfig::stdio("srv1", "unused"));
        manifest.add_server(ServerConfig::stdio("srv2", "unused"));
        manifest
            .update_tools("srv1", vec![ToolDefinition {
                name: "echo".to_string(),
                server: "srv1".to_string(),
                description: None,
                input_schema: serde_json::json!({}),
            }])
            .unwrap();
        manifest
            .update_tools("srv2", vec![ToolDefinition {
                name: "add".to_string(),
                server: "srv2".to_string(),
                description: None,
                input_schema: serde_json::json!({}),
            }])
            .unwrap();
        let router = ToolRouter::new(manager, manifest, PermissionGuard::new());

        assert_eq!(router.resolve("srv1.echo").await.unwrap(), ("srv1".to_string(), "echo".to_string()));
        assert_eq!(router.resolve("add").await.unwrap(), ("srv2".to_string(), "add".to_string()));
        assert!(router.resolve("nonexistent").await.is_err());
    }
}
