//! Cross-context wire protocol.
//!
//! ```json
//! {"type": "AGENT_API_CALL", "id": "rpc-1", "method": "storage.get", "params": {"keys": ["x"]}}
//! {"type": "AGENT_API_RESPONSE", "id": "rpc-1", "success": true, "result": {"x": 1}}
//! ```
//!
//! Messages travel inside a [`PostedMessage`] that records who posted them.
//! The page's own scripts can post on the same channel, so receivers check
//! the origin before trusting anything.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Request from the untrusted context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Response from the privileged context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// A bridge message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "AGENT_API_CALL")]
    Call(RpcRequest),
    #[serde(rename = "AGENT_API_RESPONSE")]
    Response(RpcResponse),
}

/// A raw message on the context channel: any JSON plus its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub origin: String,
    pub data: Value,
}

impl PostedMessage {
    /// Wrap a wire message.
    pub fn wire(origin: &str, message: &WireMessage) -> Result<Self, serde_json::Error> {
        Ok(Self {
            origin: origin.to_string(),
            data: serde_json::to_value(message)?,
        })
    }

    /// Parse the payload as a bridge message, if it is one.
    pub fn as_wire(&self) -> Option<WireMessage> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// One end of a bidirectional context channel.
#[derive(Debug)]
pub struct MessagePort {
    pub tx: mpsc::UnboundedSender<PostedMessage>,
    pub rx: mpsc::UnboundedReceiver<PostedMessage>,
}

/// Two connected ports: whatever one sends, the other receives.
pub fn port_pair() -> (MessagePort, MessagePort) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MessagePort { tx: a_tx, rx: a_rx },
        MessagePort { tx: b_tx, rx: b_rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_wire_shape() {
        let msg = WireMessage::Call(RpcRequest {
            id: "rpc-1".into(),
            method: "storage.get".into(),
            params: json!({"keys": ["x"]}),
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "AGENT_API_CALL", "id": "rpc-1", "method": "storage.get", "params": {"keys": ["x"]}})
        );
    }

    #[test]
    fn test_response_parses_without_optional_fields() {
        let msg: WireMessage =
            serde_json::from_value(json!({"type": "AGENT_API_RESPONSE", "id": "7", "success": false, "error": "nope"}))
                .unwrap();
        assert_eq!(msg, WireMessage::Response(RpcResponse::err("7", "nope")));
    }

    #[test]
    fn test_foreign_payload_is_not_wire() {
        let posted = PostedMessage {
            origin: "page".into(),
            data: json!({"type": "ANALYTICS_PING", "payload": 1}),
        };
        assert!(posted.as_wire().is_none());
    }

    #[tokio::test]
    async fn test_port_pair_is_crossed() {
        let (mut a, mut b) = port_pair();
        a.tx.send(PostedMessage { origin: "a".into(), data: json!(1) }).unwrap();
        b.tx.send(PostedMessage { origin: "b".into(), data: json!(2) }).unwrap();
        assert_eq!(b.rx.recv().await.unwrap().origin, "a");
        assert_eq!(a.rx.recv().await.unwrap().origin, "b");
    }
}
