//! Runtime errors.
//!
//! Every failure that can cross a component boundary is a [`RuntimeError`].
//! The variant name doubles as a stable error code (see [`RuntimeError::kind`])
//! which is what callers see in [`ExecutionResult::error`].
//!
//! [`ExecutionResult::error`]: crate::interpreter::ExecutionResult

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the dispatcher, interpreter, bridge and registry.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// No definition is stored under the requested id.
    #[error("Definition not found: {definition_id}")]
    DefinitionNotFound { definition_id: String },

    /// The definition exists but does not expose the capability.
    #[error("Capability '{capability}' not found on definition '{definition_id}'")]
    CapabilityNotFound {
        definition_id: String,
        capability: String,
    },

    /// A dependency is missing or its stored config is incomplete.
    #[error("Dependency '{dependency}' is not configured: {reason}")]
    DependencyUnresolved { dependency: String, reason: String },

    /// The definition carries privileged code and has no recorded approval.
    #[error("Definition '{definition_id}' contains privileged code and requires approval")]
    ApprovalRequired { definition_id: String },

    /// Parameters did not satisfy the capability's parameter specs.
    #[error("Invalid parameters: {0}")]
    ParameterValidationFailed(String),

    /// An action failed; wraps the first error encountered.
    #[error("Action '{action}' failed: {message}")]
    ActionExecutionFailed { action: String, message: String },

    /// No response arrived within the bridge timeout.
    #[error("RPC call '{method}' timed out after {timeout:?}")]
    RpcTimeout { method: String, timeout: Duration },

    /// The privileged side answered with `success: false`.
    #[error("RPC call '{method}' rejected: {message}")]
    RpcRejected { method: String, message: String },

    /// A process cleanup failed. Logged and swallowed by the registry.
    #[error("Cleanup of process '{process_id}' failed: {message}")]
    ProcessCleanupFailed { process_id: String, message: String },

    /// The message channel between contexts is closed or unusable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A definition could not be parsed or failed validation.
    #[error("Invalid definition: {0}")]
    Definition(String),

    /// The page host refused or failed an operation.
    #[error("Host error: {0}")]
    Host(String),

    /// Runtime configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Stable error code, equal to the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DefinitionNotFound { .. } => "DefinitionNotFound",
            Self::CapabilityNotFound { .. } => "CapabilityNotFound",
            Self::DependencyUnresolved { .. } => "DependencyUnresolved",
            Self::ApprovalRequired { .. } => "ApprovalRequired",
            Self::ParameterValidationFailed(_) => "ParameterValidationFailed",
            Self::ActionExecutionFailed { .. } => "ActionExecutionFailed",
            Self::RpcTimeout { .. } => "RpcTimeout",
            Self::RpcRejected { .. } => "RpcRejected",
            Self::ProcessCleanupFailed { .. } => "ProcessCleanupFailed",
            Self::Transport(_) => "Transport",
            Self::Definition(_) => "Definition",
            Self::Host(_) => "Host",
            Self::Config(_) => "Config",
        }
    }

    /// Wrap an error as the failure of `action`.
    ///
    /// Errors that are already `ActionExecutionFailed` pass through untouched
    /// so nested sequences report the innermost failing action.
    pub fn in_action(self, action: &str) -> Self {
        match self {
            Self::ActionExecutionFailed { .. } => self,
            other => Self::ActionExecutionFailed {
                action: action.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Shorthand for an action failure with a plain message.
    pub fn action(action: &str, message: impl Into<String>) -> Self {
        Self::ActionExecutionFailed {
            action: action.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for RuntimeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Definition(err.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Definition(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant_name() {
        let err = RuntimeError::DefinitionNotFound {
            definition_id: "x".into(),
        };
        assert_eq!(err.kind(), "DefinitionNotFound");
        assert_eq!(err.to_string(), "Definition not found: x");

        let err = RuntimeError::RpcTimeout {
            method: "storage.get".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.kind(), "RpcTimeout");
    }

    #[test]
    fn test_in_action_keeps_innermost_failure() {
        let inner = RuntimeError::Host("boom".into()).in_action("addStyle");
        let outer = inner.in_action("sequence");
        match outer {
            RuntimeError::ActionExecutionFailed { action, message } => {
                assert_eq!(action, "addStyle");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
