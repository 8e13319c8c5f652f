//! Stdio transport: spawns a child process and frames JSON-RPC messages one
//! object per newline over its stdin/stdout.
//!
//! Mirrors the shape of `astrid-mcp`'s server lifecycle (spawn, wait for a
//! ready signal, graceful-then-forced shutdown) but specified at the byte
//! level per spec §4.1, since here the engine owns the wire framing itself
//! rather than delegating to `rmcp`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::rpc::JsonRpcMessage;

/// Grace period given to a freshly spawned child before the transport stops
/// waiting for an early exit and declares the spawn successful.
const SPAWN_SAFETY_TIMEOUT: Duration = Duration::from_secs(2);

/// Time given to a child to exit gracefully before it is force-killed.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum length of a parse-error excerpt surfaced on an `error` event.
const PARSE_ERROR_EXCERPT_LEN: usize = 200;

/// Events emitted by a transport, delivered to every subscriber in arrival
/// order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A fully parsed JSON-RPC message arrived on stdout.
    Message(JsonRpcMessage),
    /// A line failed to parse as JSON, or stderr produced output.
    Error(String),
    /// The child process exited.
    Close(Option<i32>),
}

/// Minimal contract the protocol engine needs from any transport. A real
/// stdio transport and a test double both implement this; no engine code
/// depends on stdio specifics (spec §9 design note).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Spawn the underlying process/connection.
    async fn start(&self) -> Result<(), TransportError>;

    /// Write a single framed message.
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Gracefully then forcibly tear down the connection. Idempotent.
    async fn close(&self);

    /// Whether `start` has completed successfully and `close` has not run.
    async fn is_connected(&self) -> bool;

    /// Subscribe to transport events; the returned receiver gets every
    /// event emitted from this point on.
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// The child process id, if this transport is backed by one and it is
    /// currently running. Stdio transport overrides this; the default
    /// (used by non-process transports and test doubles) is `None`.
    async fn pid(&self) -> Option<u32> {
        None
    }
}

/// Broadcasts transport events to every live subscriber, dropping any whose
/// receiver has gone away.
#[derive(Default)]
struct Subscribers {
    senders: Vec<mpsc::UnboundedSender<TransportEvent>>,
}

impl Subscribers {
    fn add(&mut self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    fn broadcast(&mut self, event: TransportEvent) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Inner {
    connected: bool,
    child: Option<Child>,
}

/// Spawns a child process and frames JSON-RPC over its stdio.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    inner: Mutex<Inner>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl StdioTransport {
    /// Build a transport for the given command, args, and environment
    /// overlay (merged over the host environment when spawned).
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            inner: Mutex::new(Inner {
                connected: false,
                child: None,
            }),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    async fn emit(subscribers: &Mutex<Subscribers>, event: TransportEvent) {
        subscribers.lock().await.broadcast(event);
    }

    fn spawn_stdout_reader(
        stdout: tokio::process::ChildStdout,
        subscribers: Arc<Mutex<Subscribers>>,
    ) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcMessage>(&line) {
                            Ok(msg) => {
                                Self::emit(&subscribers, TransportEvent::Message(msg)).await;
                            },
                            Err(e) => {
                                let excerpt: String =
                                    line.chars().take(PARSE_ERROR_EXCERPT_LEN).collect();
                                warn!(error = %e, excerpt = %excerpt, "failed to parse line from child stdout");
                                Self::emit(
                                    &subscribers,
                                    TransportEvent::Error(format!(
                                        "parse error: {e} (excerpt: {excerpt})"
                                    )),
                                )
                                .await;
                            },
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        Self::emit(&subscribers, TransportEvent::Error(e.to_string())).await;
                        break;
                    },
                }
            }
        });
    }

    fn spawn_stderr_reader(
        stderr: tokio::process::ChildStderr,
        subscribers: Arc<Mutex<Subscribers>>,
    ) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                debug!(stderr = %trimmed, "child stderr");
                Self::emit(&subscribers, TransportEvent::Error(trimmed.to_string())).await;
            }
        });
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        if guard.connected || guard.child.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("no stderr pipe".to_string()))?;

        Self::spawn_stdout_reader(stdout, Arc::clone(&self.subscribers));
        Self::spawn_stderr_reader(stderr, Arc::clone(&self.subscribers));

        // Race the child's exit against a safety timer so a process that
        // crashes immediately (e.g. bad args, missing interpreter) is caught
        // here rather than surfacing later as a handshake timeout.
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| TransportError::SpawnFailed(e.to_string()))?;
                return Err(TransportError::ProcessExitedImmediately(status.code()));
            }
            () = tokio::time::sleep(SPAWN_SAFETY_TIMEOUT) => {}
        }

        guard.connected = true;
        guard.child = Some(child);
        Ok(())
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let mut guard = self.inner.lock().await;
        if !guard.connected {
            return Err(TransportError::NotConnected);
        }
        let Some(child) = guard.child.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let Some(stdin) = child.stdin.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let mut line = serde_json::to_string(message)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn close(&self) {
        let mut guard = self.inner.lock().await;
        let Some(mut child) = guard.child.take() else {
            guard.connected = false;
            return;
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        #[cfg(unix)]
        send_sigterm(&child);

        let waited = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, child.wait()).await;
        if waited.is_err() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        guard.connected = false;
        Self::emit(&self.subscribers, TransportEvent::Close(None)).await;
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.subscribers.lock().await.add()
    }

    async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.child.as_ref().and_then(Child::id)
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "failed to send SIGTERM to child");
        }
    }
}

/// In-memory transport double used by protocol-engine and manager tests, so
/// those layers can be exercised without spawning real child processes.
#[cfg(test)]
pub mod fake {
    use super::{Transport, TransportError, TransportEvent};
    use crate::rpc::JsonRpcMessage;
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    /// A test double implementing [`Transport`] entirely in memory.
    #[derive(Default)]
    pub struct FakeTransport {
        connected: Mutex<bool>,
        sent: Mutex<Vec<JsonRpcMessage>>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
        fail_start: bool,
    }

    impl FakeTransport {
        /// A transport that connects successfully.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A transport whose `start` always fails.
        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail_start: true,
                ..Self::default()
            }
        }

        /// Push an event to every current subscriber, as if it arrived over
        /// the wire.
        pub async fn push(&self, event: TransportEvent) {
            let subs = self.subscribers.lock().await;
            for tx in subs.iter() {
                let _ = tx.send(event.clone());
            }
        }

        /// Messages handed to `send` so far, in order.
        pub async fn sent_messages(&self) -> Vec<JsonRpcMessage> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn start(&self) -> Result<(), TransportError> {
            if self.fail_start {
                return Err(TransportError::SpawnFailed(
                    "fake spawn failure".to_string(),
                ));
            }
            *self.connected.lock().await = true;
            Ok(())
        }

        async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
            if !*self.connected.lock().await {
                return Err(TransportError::NotConnected);
            }
            self.sent.lock().await.push(message.clone());
            Ok(())
        }

        async fn close(&self) {
            *self.connected.lock().await = false;
            self.push(TransportEvent::Close(Some(0))).await;
        }

        async fn is_connected(&self) -> bool {
            *self.connected.lock().await
        }

        async fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().await.push(tx);
            rx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTransport;
    use super::*;
    use crate::rpc::JsonRpcRequest;

    #[tokio::test]
    async fn send_before_start_fails() {
        let t = FakeTransport::new();
        let req = JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None));
        assert!(t.send(&req).await.is_err());
    }

    #[tokio::test]
    async fn start_then_send_succeeds() {
        let t = FakeTransport::new();
        t.start().await.unwrap();
        let req = JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None));
        t.send(&req).await.unwrap();
        assert_eq!(t.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let t = FakeTransport::new();
        t.start().await.unwrap();
        t.close().await;
        t.close().await;
        assert!(!t.is_connected().await);
    }

    #[tokio::test]
    async fn failing_transport_rejects_start() {
        let t = FakeTransport::failing();
        assert!(t.start().await.is_err());
    }
}
