//! golem-mcp - host-side integration layer for the Model Context Protocol.
//!
//! This crate supervises a fleet of long-running MCP servers over stdio,
//! speaks line-delimited JSON-RPC 2.0 with each of them, discovers the
//! tools they expose, and routes tool invocations through a
//! permission-checked, audited router.
//!
//! # Architecture
//!
//! - [`transport`] frames JSON-RPC messages over a child process's stdio.
//! - [`protocol`] correlates requests with responses and runs the MCP
//!   handshake.
//! - [`client`] is the per-server facade built on top of the protocol
//!   engine.
//! - [`manifest`] is the persisted registry of known servers and their
//!   last-discovered capabilities.
//! - [`permission`] evaluates server allowlists and tool rules.
//! - [`secrets`] builds per-server environment overlays from harvested
//!   secrets.
//! - [`audit`] is the bounded, redacting invocation log.
//! - [`manager`] supervises the lifecycle of many servers at once.
//! - [`router`] ties manifest, permission, manager, and audit together to
//!   resolve and dispatch a single tool call.
//!
//! # Example
//!
//! ```rust,no_run
//! use golem_mcp::config::ServerConfig;
//! use golem_mcp::manager::ServerManager;
//!
//! # async fn example() -> Result<(), golem_mcp::error::GolemMcpError> {
//! let manager = ServerManager::new();
//! manager
//!     .start(ServerConfig::stdio("filesystem", "npx").with_args(["-y", "mcp-server-filesystem"]))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod permission;
pub mod protocol;
pub mod router;
pub mod rpc;
pub mod secrets;
pub mod transport;
pub mod types;

pub use audit::{AuditEntry, AuditLog};
pub use client::McpClient;
pub use config::{ServerConfig, Transport as TransportKind};
pub use error::{GolemMcpError, GolemMcpResult};
pub use manager::{ServerManager, ServerState, ServerStatus};
pub use manifest::Manifest;
pub use permission::{Decision, PermissionGuard, PermissionRule, Scope};
pub use protocol::ProtocolEngine;
pub use router::{InvocationOutcome, ToolRouter};
pub use secrets::SecretProvider;
pub use transport::{StdioTransport, Transport};
pub use types::{InitializeResult, ServerInfo, ToolCallResult, ToolDefinition};
