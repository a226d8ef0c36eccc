//! The declarative action language.
//!
//! Actions are a closed sum type tagged by `"type"`:
//!
//! ```yaml
//! - type: if
//!   condition: { exists: "params.selector" }
//!   then:
//!     - type: addStyle
//!       css: "{{params.selector}} { display: none !important; }"
//!   else:
//!     - type: notify
//!       title: "Overlay Remover"
//!       message: "No selector given"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expr::Expr;
use crate::process::ProcessType;

/// One node of a capability's behavior tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    /// Run child actions in order.
    Sequence { actions: Vec<Action> },

    /// Run exactly one branch; a missing `else` is a no-op.
    If {
        condition: Expr,
        then: Vec<Action>,
        #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Vec<Action>>,
    },

    /// Run `actions` once per element of `collection`.
    ForEach {
        collection: Expr,
        #[serde(rename = "as", default = "default_item_name")]
        item_name: String,
        #[serde(default = "default_index_name")]
        index_as: String,
        actions: Vec<Action>,
    },

    /// Run `actions` while `condition` holds, up to the iteration cap.
    While {
        condition: Expr,
        actions: Vec<Action>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },

    AddStyle {
        css: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    Notify { title: String, message: String },

    /// Hand inline code to the page host verbatim.
    ExecuteScript { code: String },

    /// Start a long-running effect and register it as a process.
    StartProcess {
        process_type: ProcessType,
        #[serde(default)]
        actions: Vec<Action>,
        #[serde(default)]
        options: Value,
    },

    /// Run `actions`, then register `cleanup` to run when the process stops.
    RegisterCleanup {
        #[serde(default)]
        actions: Vec<Action>,
        cleanup: Vec<Action>,
    },

    /// Stop the whole capability and yield `value`.
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
    },

    /// Call a privileged method through the RPC bridge.
    CallApi {
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        store_as: Option<String>,
    },

    SetVariable { name: String, value: Expr },

    Wait { ms: u64 },

    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
}

fn default_item_name() -> String {
    "item".to_string()
}

fn default_index_name() -> String {
    "index".to_string()
}

impl Action {
    /// Wire name of the action's type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequence { .. } => "sequence",
            Self::If { .. } => "if",
            Self::ForEach { .. } => "forEach",
            Self::While { .. } => "while",
            Self::AddStyle { .. } => "addStyle",
            Self::Notify { .. } => "notify",
            Self::ExecuteScript { .. } => "executeScript",
            Self::StartProcess { .. } => "startProcess",
            Self::RegisterCleanup { .. } => "registerCleanup",
            Self::Return { .. } => "return",
            Self::CallApi { .. } => "callApi",
            Self::SetVariable { .. } => "setVariable",
            Self::Wait { .. } => "wait",
            Self::Log { .. } => "log",
        }
    }

    /// Whether this action or any descendant runs inline script.
    pub fn runs_script(&self) -> bool {
        match self {
            Self::ExecuteScript { .. } => true,
            Self::Sequence { actions }
            | Self::ForEach { actions, .. }
            | Self::While { actions, .. }
            | Self::StartProcess { actions, .. } => actions.iter().any(Action::runs_script),
            Self::If {
                then, otherwise, ..
            } => {
                then.iter().any(Action::runs_script)
                    || otherwise
                        .as_ref()
                        .map_or(false, |o| o.iter().any(Action::runs_script))
            }
            Self::RegisterCleanup { actions, cleanup } => {
                actions.iter().chain(cleanup).any(Action::runs_script)
            }
            _ => false,
        }
    }
}

/// Level of a `log` action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}
