//! # Agent Runtime
//!
//! Capability runtime for browser agents. Agents are YAML/JSON definitions
//! whose capabilities are trees of declarative actions; the runtime
//! interprets those trees against a page, tracks the long-running effects
//! they start, and brokers privileged calls across the page/host boundary.
//!
//! ```text
//! caller ──▶ CapabilityDispatcher ──▶ Interpreter ──▶ PageHost
//!                 │                      │   │
//!                 │ (definitions,        │   └──▶ ProcessRegistry
//!                 │  credentials)        │
//!                 ▼                      ▼
//!             RpcBridge ═══ AGENT_API_CALL / RESPONSE ═══▶ MethodRouter
//! ```

pub mod config;
pub mod definitions;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod process;
pub mod rpc;
pub mod runtime;
pub mod server;

pub use config::RuntimeConfig;
pub use definitions::{AgentDefinition, CapabilityDefinition, DefinitionStore};
pub use dispatcher::{CallContext, CapabilityDispatcher, PolicyGate};
pub use error::{Result, RuntimeError};
pub use host::{HeadlessHost, PageHost};
pub use interpreter::{Action, ExecutionContext, ExecutionResult, Interpreter};
pub use process::{ProcessInfo, ProcessRegistry, ProcessType};
pub use rpc::{MethodRouter, RpcBridge};
pub use runtime::{PageContext, PrivilegedContext};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
