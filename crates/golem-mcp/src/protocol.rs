//! JSON-RPC / MCP protocol engine: request correlation, the handshake, and
//! notification dispatch over a [`Transport`].
//!
//! Grounded on the teacher's event-driven client wiring (`client.rs`'s
//! background notice listener) generalized from rmcp's built-in
//! correlation to a hand-rolled pending-request table, per spec §4.2.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::rpc::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RpcId};
use crate::transport::{Transport, TransportEvent};
use crate::types::{InitializeResult, ServerInfo};

/// Default per-request timeout, per spec §4.2.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

const PROTOCOL_VERSION: &str = "2024-11-05";

struct Pending {
    tx: oneshot::Sender<Result<Value, ProtocolError>>,
    method: String,
}

struct State {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    initialized: Mutex<bool>,
    notification_handlers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
}

/// Correlates requests with responses over a [`Transport`] and runs the MCP
/// handshake. One engine owns exactly one transport (§3 invariant 2).
pub struct ProtocolEngine {
    transport: Arc<dyn Transport>,
    state: Arc<State>,
}

impl ProtocolEngine {
    /// Wrap a transport in a protocol engine and start dispatching its
    /// events. The transport must not yet be started; call [`Self::start`]
    /// (not exposed here) is unnecessary — callers start the transport
    /// themselves via [`ProtocolEngine::connect`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let state = Arc::new(State {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            initialized: Mutex::new(false),
            notification_handlers: Mutex::new(HashMap::new()),
        });

        let engine = Self {
            transport: Arc::clone(&transport),
            state: Arc::clone(&state),
        };
        engine.spawn_dispatch_loop();
        engine
    }

    /// Start the underlying transport. Does not perform the handshake; call
    /// [`Self::initialize`] afterwards.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.transport.start().await.map_err(ProtocolError::from)
    }

    fn spawn_dispatch_loop(&self) {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut events = transport.subscribe().await;
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Message(msg) => Self::dispatch(&state, msg).await,
                    TransportEvent::Error(e) => {
                        debug!(error = %e, "transport error event");
                    },
                    TransportEvent::Close(code) => {
                        Self::cancel_all_pending(&state, code).await;
                        break;
                    },
                }
            }
        });
    }

    async fn dispatch(state: &Arc<State>, msg: JsonRpcMessage) {
        match msg {
            JsonRpcMessage::Response(resp) => {
                let id = match resp.id {
                    RpcId::Number(n) => n,
                    RpcId::String(_) => return,
                };
                let pending = state.pending.lock().await.remove(&id);
                let Some(pending) = pending else {
                    debug!(id, "dropping response for unknown or already-resolved id");
                    return;
                };
                let outcome = if let Some(err) = resp.error {
                    Err(ProtocolError::McpError {
                        code: err.code,
                        message: err.message,
                        data: err.data,
                    })
                } else {
                    Ok(resp.result.unwrap_or(Value::Null))
                };
                let _ = pending.tx.send(outcome);
            },
            JsonRpcMessage::Notification(note) => {
                let handlers = state.notification_handlers.lock().await;
                if let Some(subs) = handlers.get(&note.method) {
                    let params = note.params.unwrap_or(Value::Object(Default::default()));
                    for tx in subs {
                        let _ = tx.send(params.clone());
                    }
                }
            },
            JsonRpcMessage::Request(_) => {
                // Servers issuing requests back to the host (sampling,
                // roots) are out of scope for this layer (§1).
            },
        }
    }

    async fn cancel_all_pending(state: &Arc<State>, exit_code: Option<i32>) {
        *state.initialized.lock().await = false;
        let mut pending = state.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(Err(ProtocolError::TransportClosed(exit_code)));
        }
    }

    /// Issue a request and await its response, applying the default
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Timeout`] if no response arrives in time,
    /// [`ProtocolError::McpError`] if the server returns an error object,
    /// or a transport error if the write fails.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        self.request_with_timeout(method, params, DEFAULT_TIMEOUT)
            .await
    }

    /// As [`Self::request`] with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ProtocolError> {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.state.pending.lock().await.insert(
            id,
            Pending {
                tx,
                method: method.to_string(),
            },
        );

        let req = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.transport.send(&JsonRpcMessage::Request(req)).await {
            self.state.pending.lock().await.remove(&id);
            return Err(ProtocolError::from(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Sender dropped without sending: transport closed mid-flight,
                // already reported via cancel_all_pending.
                Err(ProtocolError::TransportClosed(None))
            },
            Err(_) => {
                self.state.pending.lock().await.remove(&id);
                Err(ProtocolError::Timeout {
                    method: method.to_string(),
                    id,
                })
            },
        }
    }

    /// Send a notification; never waits for a response.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
        let note = JsonRpcNotification::new(method, params);
        self.transport
            .send(&JsonRpcMessage::Notification(note))
            .await
            .map_err(ProtocolError::from)
    }

    /// Run the `initialize` → `notifications/initialized` handshake.
    ///
    /// # Errors
    ///
    /// Propagates any failure from the `initialize` request.
    pub async fn initialize(
        &self,
        client_info: ServerInfo,
        client_capabilities: Value,
    ) -> Result<InitializeResult, ProtocolError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": client_capabilities,
            "clientInfo": client_info,
        });
        let result = self.request("initialize", Some(params)).await?;
        let parsed: InitializeResult = serde_json::from_value(result).map_err(|e| {
            ProtocolError::McpError {
                code: -32603,
                message: format!("malformed initialize result: {e}"),
                data: None,
            }
        })?;
        self.notify("notifications/initialized", None).await?;
        *self.state.initialized.lock().await = true;
        Ok(parsed)
    }

    /// Whether the handshake has completed and not since been torn down.
    pub async fn is_initialized(&self) -> bool {
        *self.state.initialized.lock().await
    }

    /// The underlying transport's process id, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.transport.pid().await
    }

    /// Best-effort `shutdown` request, then reject every pending request
    /// and mark the engine not initialized.
    pub async fn shutdown(&self) {
        if *self.state.initialized.lock().await {
            if let Err(e) = self.request("shutdown", None).await {
                warn!(error = %e, "shutdown request failed, continuing teardown");
            }
        }
        *self.state.initialized.lock().await = false;
        let mut pending = self.state.pending.lock().await;
        for (_, entry) in pending.drain() {
            debug!(method = %entry.method, "rejecting pending request: shutting down");
            let _ = entry.tx.send(Err(ProtocolError::ShuttingDown));
        }
    }

    /// Register interest in a notification method; returns a receiver fed
    /// with each matching notification's `params` (or `{}` if absent).
    pub async fn on_notification(&self, method: impl Into<String>) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .notification_handlers
            .lock()
            .await
            .entry(method.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Tear down the transport. Does not run the MCP `shutdown` handshake;
    /// callers should call [`Self::shutdown`] first if initialized.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use crate::rpc::{JsonRpcErrorObject, JsonRpcResponse};

    fn client_info() -> ServerInfo {
        ServerInfo {
            name: "golem-mcp".to_string(),
            version: "0.1.0".to_string(),
        }
    }

    #[tokio::test]
    async fn initialize_completes_handshake() {
        let transport = Arc::new(FakeTransport::new());
        transport.start().await.unwrap();
        let engine = ProtocolEngine::new(transport.clone());

        let responder = {
            let transport = transport.clone();
            tokio::spawn(async move {
                // Wait for the initialize request, then answer it.
                loop {
                    let sent = transport.sent_messages().await;
                    if let Some(JsonRpcMessage::Request(req)) = sent.first() {
                        let resp = JsonRpcResponse {
                            jsonrpc: "2.0".to_string(),
                            id: req.id.clone(),
                            result: Some(serde_json::json!({
                                "protocolVersion": "2024-11-05",
                                "capabilities": {},
                                "serverInfo": {"name": "test-server", "version": "1.0.0"},
                            })),
                            error: None,
                        };
                        transport
                            .push(TransportEvent::Message(JsonRpcMessage::Response(resp)))
                            .await;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let result = engine
            .initialize(client_info(), serde_json::json!({}))
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(result.server_info.name, "test-server");
        assert!(engine.is_initialized().await);

        let sent = transport.sent_messages().await;
        assert!(matches!(sent.last(), Some(JsonRpcMessage::Notification(n)) if n.method == "notifications/initialized"));
    }

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        let transport = Arc::new(FakeTransport::new());
        transport.start().await.unwrap();
        let engine = ProtocolEngine::new(transport);

        let err = engine
            .request_with_timeout("slow/method", None, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn mcp_error_response_is_surfaced() {
        let transport = Arc::new(FakeTransport::new());
        transport.start().await.unwrap();
        let engine = ProtocolEngine::new(transport.clone());

        let call = tokio::spawn({
            let transport = transport.clone();
            async move {
                loop {
                    let sent = transport.sent_messages().await;
                    if let Some(JsonRpcMessage::Request(req)) = sent.first() {
                        let resp = JsonRpcResponse {
                            jsonrpc: "2.0".to_string(),
                            id: req.id.clone(),
                            result: None,
                            error: Some(JsonRpcErrorObject {
                                code: -32601,
                                message: "method not found".to_string(),
                                data: None,
                            }),
                        };
                        transport
                            .push(TransportEvent::Message(JsonRpcMessage::Response(resp)))
                            .await;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let err = engine.request("nope", None).await.unwrap_err();
        call.await.unwrap();
        assert!(matches!(err, ProtocolError::McpError { code: -32601, .. }));
    }

    #[tokio::test]
    async fn transport_close_cancels_pending_requests() {
        let transport = Arc::new(FakeTransport::new());
        transport.start().await.unwrap();
        let engine = ProtocolEngine::new(transport.clone());

        let pending = tokio::spawn({
            let engine_transport = transport.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                engine_transport.push(TransportEvent::Close(Some(1))).await;
            }
        });

        let err = engine
            .request_with_timeout("never/answered", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        pending.await.unwrap();
        assert!(matches!(err, ProtocolError::TransportClosed(Some(1))));
    }

    #[tokio::test]
    async fn notification_reaches_registered_handler() {
        let transport = Arc::new(FakeTransport::new());
        transport.start().await.unwrap();
        let engine = ProtocolEngine::new(transport.clone());

        let mut rx = engine.on_notification("notifications/message").await;
        transport
            .push(TransportEvent::Message(JsonRpcMessage::Notification(
                JsonRpcNotification::new("notifications/message", Some(serde_json::json!({"level": "info"}))),
            )))
            .await;

        let params = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params["level"], "info");
    }
}
