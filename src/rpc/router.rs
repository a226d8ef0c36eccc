//! Method router: `"<namespace>.<action>"` dispatch on the privileged side.
//!
//! Namespaces register as [`NamespaceHandler`] implementations. The router
//! splits the method once at the first dot and looks the namespace up in a
//! `HashMap`; the handler matches the action.
//!
//! # Example
//!
//! ```
//! use agent_runtime::rpc::router::{MethodRouter, NamespaceHandler, RouteError};
//! use agent_runtime::rpc::RpcRequest;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct Clock;
//!
//! #[async_trait]
//! impl NamespaceHandler for Clock {
//!     fn namespace(&self) -> &str { "clock" }
//!     async fn handle(&self, action: &str, _params: Value) -> Result<Value, RouteError> {
//!         match action {
//!             "now" => Ok(json!(0)),
//!             other => Err(RouteError::UnknownAction(other.to_string())),
//!         }
//!     }
//! }
//!
//! let mut router = MethodRouter::new();
//! router.register(std::sync::Arc::new(Clock));
//! assert!(router.has_namespace("clock"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::message::{RpcRequest, RpcResponse};

/// Why a namespace handler could not complete an action.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

impl From<crate::error::RuntimeError> for RouteError {
    fn from(err: crate::error::RuntimeError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// A privileged namespace, e.g. `storage`.
#[async_trait]
pub trait NamespaceHandler: Send + Sync {
    /// The prefix this handler serves.
    fn namespace(&self) -> &str;

    async fn handle(&self, action: &str, params: Value) -> Result<Value, RouteError>;
}

/// Split `"storage.get"` into `("storage", "get")`.
///
/// Both halves must be non-empty; the action may itself contain dots.
pub fn split_method(method: &str) -> Option<(&str, &str)> {
    let (namespace, action) = method.split_once('.')?;
    if namespace.is_empty() || action.is_empty() {
        return None;
    }
    Some((namespace, action))
}

/// Dispatches requests to namespace handlers.
pub struct MethodRouter {
    handlers: HashMap<String, Arc<dyn NamespaceHandler>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any handler for the same namespace.
    pub fn register(&mut self, handler: Arc<dyn NamespaceHandler>) {
        let namespace = handler.namespace().to_string();
        self.handlers.insert(namespace, handler);
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.handlers.contains_key(namespace)
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a request. Never fails: errors become `success: false`.
    pub async fn route(&self, request: &RpcRequest) -> RpcResponse {
        let Some((namespace, action)) = split_method(&request.method) else {
            return RpcResponse::err(
                &request.id,
                format!(
                    "Malformed method '{}': expected '<namespace>.<action>'",
                    request.method
                ),
            );
        };

        let Some(handler) = self.handlers.get(namespace) else {
            return RpcResponse::err(
                &request.id,
                format!(
                    "Unknown namespace '{}' (method '{}')",
                    namespace, request.method
                ),
            );
        };

        log::debug!("Router: dispatching {} ({})", request.method, request.id);

        match handler.handle(action, request.params.clone()).await {
            Ok(result) => RpcResponse::ok(&request.id, result),
            Err(RouteError::UnknownAction(action)) => RpcResponse::err(
                &request.id,
                format!("Unknown action '{}' in namespace '{}'", action, namespace),
            ),
            Err(e) => {
                log::debug!("Router: {} failed: {}", request.method, e);
                RpcResponse::err(&request.id, e.to_string())
            }
        }
    }
}

impl Default for MethodRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl NamespaceHandler for EchoHandler {
        fn namespace(&self) -> &str {
            "echo"
        }

        async fn handle(&self, action: &str, params: Value) -> Result<Value, RouteError> {
            match action {
                "back" => Ok(params),
                "fail" => Err(RouteError::Failed("echo refused".into())),
                other => Err(RouteError::UnknownAction(other.to_string())),
            }
        }
    }

    fn request(method: &str) -> RpcRequest {
        RpcRequest {
            id: "1".into(),
            method: method.into(),
            params: json!({"v": 1}),
        }
    }

    fn router() -> MethodRouter {
        let mut router = MethodRouter::new();
        router.register(Arc::new(EchoHandler));
        router
    }

    #[test]
    fn test_split_method() {
        assert_eq!(split_method("storage.get"), Some(("storage", "get")));
        assert_eq!(split_method("tabs.query.active"), Some(("tabs", "query.active")));
        assert_eq!(split_method("storage"), None);
        assert_eq!(split_method(".get"), None);
        assert_eq!(split_method("storage."), None);
    }

    #[tokio::test]
    async fn test_route_success() {
        let response = router().route(&request("echo.back")).await;
        assert_eq!(response, RpcResponse::ok("1", json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_unknown_namespace_and_action_are_structured() {
        let router = router();

        let response = router.route(&request("alien.probe")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Unknown namespace 'alien'"));

        let response = router.route(&request("echo.shout")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Unknown action 'shout'"));

        let response = router.route(&request("nodot")).await;
        assert!(response.error.unwrap().contains("Malformed method"));
    }

    #[tokio::test]
    async fn test_handler_failure_is_structured() {
        let response = router().route(&request("echo.fail")).await;
        assert_eq!(response, RpcResponse::err("1", "echo refused"));
    }
}
