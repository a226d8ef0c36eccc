//! Capability-scoped execution context.

use serde_json::{Map, Value};

/// Bindings and ownership for one capability invocation.
///
/// Standard bindings set by the dispatcher:
/// - `params.*`: validated capability parameters
/// - `dependencies.<id>.*`: stored config of each dependency
/// - `agent.id`, `capability.name`
/// - `call.*`: caller-supplied call context
///
/// Loops and triggered process runs work on [`child`](Self::child) copies, so
/// bindings made inside an iteration do not leak into the enclosing scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub agent_id: String,
    pub capability_name: String,
    bindings: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(agent_id: impl Into<String>, capability_name: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        let capability_name = capability_name.into();
        let mut bindings = Map::new();
        bindings.insert("agent".into(), serde_json::json!({ "id": agent_id }));
        bindings.insert(
            "capability".into(),
            serde_json::json!({ "name": capability_name }),
        );
        Self {
            agent_id,
            capability_name,
            bindings,
        }
    }

    /// Builder: bind a top-level name.
    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Bind (or rebind) a top-level name.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Resolve a dotted path such as `params.items.0.title`.
    ///
    /// Object segments are keys, array segments are indices.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.bindings.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// A copy for a nested scope.
    pub fn child(&self) -> Self {
        self.clone()
    }

    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }
}
