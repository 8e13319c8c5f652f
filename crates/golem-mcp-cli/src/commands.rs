//! Subcommand implementations (§6 CLI surface).
//!
//! Every function here loads the manifest fresh, performs its work, and
//! (where a server was started) saves the manifest and stops the server
//! again before returning, since no daemon persists state across
//! invocations.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use golem_mcp::config::ServerConfig;
use golem_mcp::manager::ServerManager;
use golem_mcp::manifest::Manifest;
use golem_mcp::permission::{PermissionGuard, PermissionRule};
use golem_mcp::router::ToolRouter;
use golem_mcp::secrets::SecretProvider;

/// Register a server in the manifest.
pub fn add(name: &str, command: &str, args: Vec<String>, auto_start: bool) -> Result<()> {
    let mut manifest = Manifest::load_default();
    let config = ServerConfig::stdio(name, command).with_args(args).auto_start(auto_start);
    manifest.add_server(config);
    manifest.save_default().context("failed to save manifest")?;
    println!("added '{name}'");
    Ok(())
}

/// Remove a server from the manifest.
pub fn remove(name: &str) -> Result<()> {
    let mut manifest = Manifest::load_default();
    if !manifest.remove_server(name) {
        bail!("server not found: {name}");
    }
    manifest.save_default().context("failed to save manifest")?;
    println!("removed '{name}'");
    Ok(())
}

/// List every registered server with its command and cached tool count.
pub fn list() -> Result<()> {
    let manifest = Manifest::load_default();
    let names = manifest.list_servers();
    if names.is_empty() {
        println!("no servers registered");
        return Ok(());
    }
    for name in names {
        let entry = manifest.get_server(name).expect("listed server must exist");
        let tool_count = entry.tools.as_ref().map_or(0, Vec::len);
        println!(
            "{name}\t{} {}\tauto_start={}\ttools={tool_count}",
            entry.config.command,
            entry.config.args.join(" "),
            entry.config.auto_start,
        );
    }
    Ok(())
}

fn config_for(manifest: &Manifest, name: &str) -> Result<ServerConfig> {
    manifest
        .get_server(name)
        .map(|e| e.config.clone())
        .with_context(|| format!("server not found: {name}"))
}

/// Collect every server's permission rules into one flat list, evaluated
/// in server-registration order. A server without rules contributes none.
fn collect_rules(manifest: &Manifest) -> Vec<PermissionRule> {
    manifest
        .list_servers()
        .into_iter()
        .filter_map(|name| manifest.get_server(name))
        .flat_map(|entry| entry.config.permissions.clone())
        .collect()
}

fn new_manager() -> ServerManager {
    ServerManager::with_secrets(SecretProvider::load_from_env(None))
}

/// Start a server, probe its capabilities and tools, persist them to the
/// manifest, then stop it again.
pub async fn start(name: &str) -> Result<()> {
    let mut manifest = Manifest::load_default();
    let config = config_for(&manifest, name)?;

    let manager = new_manager();
    manager.start(config).await?;
    let state = manager.get(name).await.expect("just started");
    println!(
        "started '{name}' (pid={}, tools={})",
        state.pid.map_or_else(|| "?".to_string(), |p| p.to_string()),
        state.tool_count
    );

    if let Some(caps) = state.capabilities.clone() {
        let _ = manifest.update_capabilities(name, caps);
    }
    if let Some(client) = manager.get_client(name).await {
        if let Ok(tools) = client.read().await.list_tools(None).await {
            let _ = manifest.update_tools(name, tools);
        }
    }
    manifest.save_default().context("failed to save manifest")?;

    manager.stop(name).await.ok();
    Ok(())
}

/// Stop a server. Since no daemon persists a running server between
/// invocations, this call ordinarily surfaces the manager's real
/// `NotFound` error.
pub async fn stop(name: &str) -> Result<()> {
    let manager = new_manager();
    manager.stop(name).await?;
    println!("stopped '{name}'");
    Ok(())
}

/// Restart a server: since no daemon persists a running server between
/// invocations, this first starts it (so the manager remembers its config),
/// then exercises the real `restart` by name.
pub async fn restart(name: &str) -> Result<()> {
    let manifest = Manifest::load_default();
    let config = config_for(&manifest, name)?;

    let manager = new_manager();
    manager.start(config).await?;
    manager.restart(name).await?;
    println!("restarted '{name}'");
    manager.stop(name).await.ok();
    Ok(())
}

/// List tools across one server or every registered server.
pub async fn tools(server: Option<String>) -> Result<()> {
    let mut manifest = Manifest::load_default();
    let names: Vec<String> = match &server {
        Some(name) => vec![name.clone()],
        None => manifest.list_servers().into_iter().map(str::to_string).collect(),
    };
    if names.is_empty() {
        println!("no servers registered");
        return Ok(());
    }

    let manager = new_manager();
    let mut started = Vec::new();
    for name in &names {
        let config = config_for(&manifest, name)?;
        match manager.start(config).await {
            Ok(()) => started.push(name.clone()),
            Err(e) => eprintln!("Error: failed to start '{name}': {e}"),
        }
    }

    let mut printed = 0usize;
    for name in &started {
        let Some(client) = manager.get_client(name).await else {
            continue;
        };
        match client.read().await.list_tools(None).await {
            Ok(tool_list) => {
                let _ = manifest.update_tools(name, tool_list.clone());
                for tool in tool_list {
                    println!("{name}.{}\t{}", tool.name, tool.description.unwrap_or_default());
                    printed += 1;
                }
            },
            Err(e) => eprintln!("Error: failed to list tools for '{name}': {e}"),
        }
    }
    if printed == 0 {
        println!("no tools discovered");
    }

    manifest.save_default().context("failed to save manifest")?;
    manager.stop_all().await;
    Ok(())
}

/// Resolve which server owns a tool name without requiring the full
/// router (used to know which single server to start for `call`).
fn resolve_server(manifest: &Manifest, name: &str) -> Result<String> {
    if let Some((server, _)) = name.split_once('.') {
        return Ok(server.to_string());
    }
    manifest
        .find_tool(name)
        .map(|(server, _)| server)
        .with_context(|| format!("tool not found: {name}"))
}

/// Call a tool by name, starting its owning server for the duration of
/// the call.
pub async fn call(tool: &str, json: Option<String>) -> Result<()> {
    let manifest = Manifest::load_default();
    let args = json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .context("invalid JSON arguments")?;

    let server_name = resolve_server(&manifest, tool)?;
    let config = config_for(&manifest, &server_name)?;

    let manager = Arc::new(new_manager());
    manager.start(config).await?;

    let rules = collect_rules(&manifest);
    let guard = PermissionGuard::new().with_rules(rules);
    let router = ToolRouter::new(Arc::clone(&manager), manifest, guard);

    let outcome = router.invoke(tool, args).await;
    manager.stop(&server_name).await.ok();
    let outcome = outcome?;

    println!("{}", serde_json::to_string_pretty(&outcome.result.content)?);
    if outcome.result.is_error {
        bail!("tool '{tool}' reported an error");
    }
    Ok(())
}

/// Show audit entries recorded during this invocation. Since the audit
/// log lives only in memory for the process that built it, a standalone
/// invocation always reports an empty history; a long-lived host
/// embedding this crate directly is where `ToolRouter::audit_recent` and
/// `audit_for_server` become useful.
pub fn audit(server: Option<String>) -> Result<()> {
    match server {
        Some(name) => println!("no audit entries recorded for '{name}' in this invocation"),
        None => println!("no audit entries recorded in this invocation"),
    }
    Ok(())
}
