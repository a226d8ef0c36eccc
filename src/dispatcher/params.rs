//! Capability parameter validation.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::definitions::ParameterSpec;
use crate::error::{Result, RuntimeError};

/// Check `params` against `specs` and return the bound parameter object.
///
/// - a required parameter that is missing (or `null`) fails
/// - a present parameter of the wrong primitive type fails
/// - an omitted optional parameter takes its declared default
/// - parameters nobody declared pass through untouched
pub fn validate_params(specs: &[ParameterSpec], params: HashMap<String, Value>) -> Result<Value> {
    let mut bound: Map<String, Value> = params.into_iter().collect();

    for spec in specs {
        match bound.get(&spec.name) {
            Some(value) if !value.is_null() => {
                if !spec.param_type.matches(value) {
                    return Err(RuntimeError::ParameterValidationFailed(format!(
                        "'{}' must be of type {}, got {}",
                        spec.name,
                        spec.param_type.as_str(),
                        json_type(value)
                    )));
                }
            }
            _ => {
                if let Some(default) = &spec.default {
                    bound.insert(spec.name.clone(), default.clone());
                } else if spec.required {
                    return Err(RuntimeError::ParameterValidationFailed(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
            }
        }
    }

    Ok(Value::Object(bound))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
