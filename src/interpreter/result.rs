//! Structured capability results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RuntimeError;

/// Outcome of a capability invocation.
///
/// Failures carry the error code in `error` and the human-readable text in
/// `detail`, so callers never need to catch anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExecutionResult {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            detail: None,
        }
    }

    pub fn failure(err: &RuntimeError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.kind().to_string()),
            detail: Some(err.to_string()),
        }
    }
}

impl From<crate::error::Result<Option<Value>>> for ExecutionResult {
    fn from(result: crate::error::Result<Option<Value>>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_shape() {
        let err = RuntimeError::DefinitionNotFound {
            definition_id: "ghost".into(),
        };
        let json = serde_json::to_value(ExecutionResult::failure(&err)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "error": "DefinitionNotFound",
                "detail": "Definition not found: ghost"
            })
        );
    }

    #[test]
    fn test_success_omits_empty_fields() {
        let json = serde_json::to_value(ExecutionResult::ok(None)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true}));
    }
}
