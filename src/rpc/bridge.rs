//! Page-side RPC bridge.
//!
//! Calls get a fresh id, a pending entry, and a posted `AGENT_API_CALL`.
//! A background reader matches `AGENT_API_RESPONSE` messages back to the
//! pending entries. Each call is timed out on its own; a timed-out entry is
//! removed, so a late response finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::message::{MessagePort, PostedMessage, RpcRequest, RpcResponse, WireMessage};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};

/// A call waiting for its response.
struct PendingCall {
    method: String,
    deadline: Instant,
    responder: oneshot::Sender<RpcResponse>,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingCall>>>;

/// Removes a call's pending entry when the call future goes away, however
/// it ends. Removing an id the reader already took is a no-op.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

/// Request/response correlation over a [`MessagePort`].
pub struct RpcBridge {
    origin: String,
    timeout: Duration,
    next_id: AtomicU64,
    pending: PendingTable,
    outbound: mpsc::UnboundedSender<PostedMessage>,
    reader: JoinHandle<()>,
}

impl RpcBridge {
    /// Attach to `port`, accepting responses only from `config.host_origin`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(port: MessagePort, config: &RuntimeConfig) -> Self {
        let MessagePort { tx, rx } = port;
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(
            rx,
            Arc::clone(&pending),
            config.host_origin.clone(),
        ));

        Self {
            origin: config.page_origin.clone(),
            timeout: config.rpc_timeout(),
            next_id: AtomicU64::new(1),
            pending,
            outbound: tx,
            reader,
        }
    }

    /// Call a privileged method and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = format!("rpc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let message = WireMessage::Call(RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        });
        let posted = PostedMessage::wire(&self.origin, &message)
            .map_err(|e| RuntimeError::Transport(format!("cannot encode call: {e}")))?;

        // Register before posting so a fast response cannot miss its entry.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                deadline: Instant::now() + self.timeout,
                responder: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        log::debug!("Bridge: calling {} ({})", method, id);
        if self.outbound.send(posted).is_err() {
            return Err(RuntimeError::Transport(
                "privileged context is gone".to_string(),
            ));
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(RuntimeError::Transport(
                    "bridge closed before the response arrived".to_string(),
                ))
            }
            Err(_) => {
                log::warn!("Bridge: {} ({}) timed out after {:?}", method, id, self.timeout);
                return Err(RuntimeError::RpcTimeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(RuntimeError::RpcRejected {
                method: method.to_string(),
                message: response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Methods of calls awaiting a response, sorted.
    pub fn pending_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .pending
            .lock()
            .values()
            .map(|p| p.method.clone())
            .collect();
        methods.sort();
        methods
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for RpcBridge {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for RpcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcBridge")
            .field("origin", &self.origin)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Match inbound responses to pending calls until the channel closes.
async fn read_loop(
    mut rx: mpsc::UnboundedReceiver<PostedMessage>,
    pending: PendingTable,
    expected_origin: String,
) {
    while let Some(posted) = rx.recv().await {
        if posted.origin != expected_origin {
            log::warn!(
                "Bridge: dropping message from unexpected origin '{}'",
                posted.origin
            );
            continue;
        }

        let response = match posted.as_wire() {
            Some(WireMessage::Response(response)) => response,
            Some(WireMessage::Call(call)) => {
                log::debug!("Bridge: ignoring inbound call {}", call.id);
                continue;
            }
            None => continue,
        };

        let entry = pending.lock().remove(&response.id);
        match entry {
            Some(call) if Instant::now() <= call.deadline => {
                let _ = call.responder.send(response);
            }
            Some(call) => {
                log::debug!(
                    "Bridge: dropping late response for {} ({})",
                    call.method,
                    response.id
                );
            }
            None => {
                log::debug!(
                    "Bridge: dropping response for unknown or settled id {}",
                    response.id
                );
            }
        }
    }

    // Dropping the responders fails every outstanding call.
    pending.lock().clear();
    log::debug!("Bridge: channel closed");
}
