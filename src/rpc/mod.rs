//! # RPC Bridge
//!
//! Request/response messaging between the untrusted page context and the
//! privileged host context.
//!
//! ```text
//!   page context                         privileged context
//!  ┌──────────────┐  AGENT_API_CALL     ┌────────────────────┐
//!  │  RpcBridge   │ ──────────────────▶ │ PrivilegedEndpoint │
//!  │  (pending    │                     │   └─ MethodRouter  │
//!  │   call map)  │ ◀────────────────── │       ├─ storage   │
//!  └──────────────┘  AGENT_API_RESPONSE │       ├─ definitions
//!                                       │       └─ config    │
//!                                       └────────────────────┘
//! ```
//!
//! Each side only trusts messages posted under the other side's origin.

pub mod bridge;
pub mod endpoint;
pub mod message;
pub mod namespaces;
pub mod remote;
pub mod router;

use std::sync::Arc;

use tokio::task::JoinHandle;

pub use bridge::RpcBridge;
pub use endpoint::PrivilegedEndpoint;
pub use message::{port_pair, MessagePort, PostedMessage, RpcRequest, RpcResponse, WireMessage};
pub use namespaces::{builtin_router, InMemoryKeyValueStore, KeyValueStore};
pub use remote::{RemoteCredentialStore, RemoteDefinitionStore};
pub use router::{MethodRouter, NamespaceHandler, RouteError};

use crate::config::RuntimeConfig;

/// Wire a bridge to an endpoint over an in-process channel pair.
///
/// Returns the page-side bridge and the endpoint's serve task.
pub fn connect_in_process(
    router: Arc<MethodRouter>,
    config: &RuntimeConfig,
) -> (RpcBridge, JoinHandle<()>) {
    let (page_port, host_port) = port_pair();
    let serve = PrivilegedEndpoint::new(router, config).spawn(host_port);
    let bridge = RpcBridge::connect(page_port, config);
    (bridge, serve)
}
