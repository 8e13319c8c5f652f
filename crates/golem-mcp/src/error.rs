//! Error taxonomy for the MCP host integration layer.
//!
//! Each subsystem owns its own error enum; [`GolemMcpError`] composes them
//! behind `#[from]` conversions so callers crossing subsystem boundaries
//! (the router calling into the manager calling into the client) can
//! propagate with a single `?`.

use thiserror::Error;

/// Errors raised by the stdio transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `send` was called before `start` or after `close`.
    #[error("transport not connected")]
    NotConnected,

    /// `start` was called twice on the same transport.
    #[error("transport already started")]
    AlreadyStarted,

    /// The child process could not be spawned.
    #[error("failed to spawn child process: {0}")]
    SpawnFailed(String),

    /// The child process exited before the startup handshake completed.
    #[error("process exited immediately with code {0:?}")]
    ProcessExitedImmediately(Option<i32>),

    /// Writing a framed message to the child's stdin failed.
    #[error("failed to write to child stdin: {0}")]
    WriteFailed(String),
}

/// Errors raised by the JSON-RPC / MCP protocol engine.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A request was not answered within its timeout.
    #[error("request {method} (id={id}) timed out")]
    Timeout {
        /// The method that was called.
        method: String,
        /// The request id that was allocated.
        id: u64,
    },

    /// The transport closed while requests were pending.
    #[error("transport closed (exit code {0:?})")]
    TransportClosed(Option<i32>),

    /// The server responded with a JSON-RPC error object.
    #[error("MCP error {code}: {message}")]
    McpError {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured data.
        data: Option<serde_json::Value>,
    },

    /// A request was issued, or in flight, while the engine was shutting
    /// down.
    #[error("protocol engine is shutting down")]
    ShuttingDown,

    /// The engine was asked to issue a request before `initialize` had
    /// completed.
    #[error("protocol engine is not initialized")]
    NotInitialized,

    /// Transport-level failure while sending a request or notification.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the server manager's lifecycle operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// A server of this name is already running.
    #[error("server already running: {0}")]
    AlreadyRunning(String),

    /// No server of this name is known to the manager.
    #[error("server not found: {0}")]
    NotFound(String),

    /// Spawning or initializing the server failed.
    #[error("failed to start server {name}: {cause}")]
    StartupFailed {
        /// Server name.
        name: String,
        /// Underlying cause.
        cause: String,
    },
}

/// Errors raised by the tool router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No server/tool pair could be resolved for the given name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The permission guard denied the call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The resolved server is not currently running.
    #[error("server not running: {0}")]
    ServerNotRunning(String),
}

/// Errors raised by the manifest cache.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// An update was attempted against a server the manifest does not know.
    #[error("unknown server in manifest: {0}")]
    UnknownServer(String),

    /// A user-supplied server-config file failed to parse.
    #[error("invalid config file {path}: {detail}")]
    InvalidConfigFile {
        /// Path that was read.
        path: String,
        /// Parse failure detail.
        detail: String,
    },

    /// Filesystem I/O failure while reading or writing the manifest.
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum GolemMcpError {
    /// Transport subsystem failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol engine failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Server manager failure.
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// Tool router failure.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Manifest cache failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// JSON (de)serialization failure outside the protocol engine (e.g.
    /// config files, manifest entries).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type GolemMcpResult<T> = Result<T, GolemMcpError>;
