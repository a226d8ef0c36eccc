//! # Capability Dispatcher
//!
//! The façade the outside world calls: resolve a definition, check its
//! dependencies and approval, validate parameters, bind a fresh execution
//! context and hand the capability's actions to the interpreter.
//!
//! ```text
//! execute_capability("overlay-remover", "remove_overlays_once", params, call)
//!   1. load definition            → DefinitionNotFound
//!   2. resolve dependencies       → DependencyUnresolved
//!   3. approval gate              → ApprovalRequired
//!   4. locate capability          → CapabilityNotFound
//!   5. validate parameters        → ParameterValidationFailed
//!   6. interpreter.execute(...)   → ExecutionResult
//! ```
//!
//! Errors never cross this boundary; every outcome is an [`ExecutionResult`].

pub mod params;
pub mod policy;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use params::validate_params;
pub use policy::{ApprovalMemory, ApprovalRecord, PolicyGate};

use crate::definitions::{AgentDefinition, CredentialStore, DefinitionStore, ParameterSpec};
use crate::error::{Result, RuntimeError};
use crate::interpreter::{ExecutionContext, ExecutionResult, Interpreter};

/// Who is invoking a capability, bound as `call.*`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    /// e.g. `"popup"`, `"contextMenu"`, `"http"`
    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl CallContext {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Capability listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

pub struct CapabilityDispatcher {
    definitions: Arc<dyn DefinitionStore>,
    credentials: Arc<dyn CredentialStore>,
    policy: Arc<dyn PolicyGate>,
    interpreter: Interpreter,
}

impl CapabilityDispatcher {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        credentials: Arc<dyn CredentialStore>,
        policy: Arc<dyn PolicyGate>,
        interpreter: Interpreter,
    ) -> Self {
        Self {
            definitions,
            credentials,
            policy,
            interpreter,
        }
    }

    pub fn policy(&self) -> &Arc<dyn PolicyGate> {
        &self.policy
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Run one capability. Never fails; failures are reported in the result.
    pub async fn execute_capability(
        &self,
        definition_id: &str,
        capability_name: &str,
        params: HashMap<String, Value>,
        call: &CallContext,
    ) -> ExecutionResult {
        log::debug!(
            "Dispatching {}/{} (source: {})",
            definition_id,
            capability_name,
            if call.source.is_empty() { "-" } else { call.source.as_str() }
        );

        let result = match self
            .prepare(definition_id, capability_name, params, call)
            .await
        {
            Ok((definition, mut ctx)) => {
                // `prepare` has already proven the capability exists.
                match definition.capability(capability_name) {
                    Some(capability) => {
                        self.interpreter.execute(&capability.actions, &mut ctx).await
                    }
                    None => ExecutionResult::failure(&RuntimeError::CapabilityNotFound {
                        definition_id: definition_id.to_string(),
                        capability: capability_name.to_string(),
                    }),
                }
            }
            Err(e) => ExecutionResult::failure(&e),
        };

        if result.success {
            log::info!("{}/{} succeeded", definition_id, capability_name);
        } else {
            log::warn!(
                "{}/{} failed: {}",
                definition_id,
                capability_name,
                result.detail.as_deref().unwrap_or("unknown error")
            );
        }
        result
    }

    /// Steps 1 to 5, ending in a bound context.
    async fn prepare(
        &self,
        definition_id: &str,
        capability_name: &str,
        params: HashMap<String, Value>,
        call: &CallContext,
    ) -> Result<(Arc<AgentDefinition>, ExecutionContext)> {
        let definition = self.load(definition_id).await?;
        let dependencies = self.resolve_dependencies(&definition).await?;

        if self.policy.approval_required(&definition) && !self.policy.has_approval(definition_id) {
            return Err(RuntimeError::ApprovalRequired {
                definition_id: definition_id.to_string(),
            });
        }

        let capability = definition.capability(capability_name).ok_or_else(|| {
            RuntimeError::CapabilityNotFound {
                definition_id: definition_id.to_string(),
                capability: capability_name.to_string(),
            }
        })?;
        let params = validate_params(&capability.parameters, params)?;

        let ctx = ExecutionContext::new(definition_id, capability_name)
            .with_binding("params", params)
            .with_binding("dependencies", Value::Object(dependencies))
            .with_binding("call", serde_json::to_value(call)?);

        Ok((definition, ctx))
    }

    async fn load(&self, definition_id: &str) -> Result<Arc<AgentDefinition>> {
        self.definitions
            .load_definition(definition_id)
            .await?
            .ok_or_else(|| RuntimeError::DefinitionNotFound {
                definition_id: definition_id.to_string(),
            })
    }

    /// Each dependency must exist, be configured, and carry every required
    /// config field with a non-empty value. Returns the configs by id.
    async fn resolve_dependencies(&self, definition: &AgentDefinition) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();

        for dependency in &definition.dependencies {
            let unresolved = |reason: String| RuntimeError::DependencyUnresolved {
                dependency: dependency.clone(),
                reason,
            };

            let dep = self
                .definitions
                .load_definition(dependency)
                .await?
                .ok_or_else(|| unresolved("definition not found".into()))?;

            if !self.credentials.is_configured(dependency).await? {
                return Err(unresolved("not configured".into()));
            }
            let config = self
                .credentials
                .get_config(dependency)
                .await?
                .unwrap_or_default();

            if let Some(missing) = dep
                .required_config_fields()
                .find(|field| config.get(*field).map_or(true, |v| v.trim().is_empty()))
            {
                return Err(unresolved(format!("required field '{missing}' is empty")));
            }

            resolved.insert(dependency.clone(), serde_json::to_value(config)?);
        }

        Ok(resolved)
    }

    /// Capabilities a definition exposes.
    pub async fn list_capabilities(&self, definition_id: &str) -> Result<Vec<CapabilitySummary>> {
        let definition = self.load(definition_id).await?;
        Ok(definition
            .capabilities
            .iter()
            .map(|c| CapabilitySummary {
                name: c.name.clone(),
                description: c.description.clone(),
                parameters: c.parameters.clone(),
            })
            .collect())
    }

    /// Stop every process a capability started.
    pub fn stop_capability(&self, definition_id: &str, capability_name: &str) -> usize {
        self.interpreter
            .registry()
            .stop_capability(definition_id, capability_name)
    }

    /// Stop every process an agent started.
    pub fn stop_agent(&self, definition_id: &str) -> usize {
        self.interpreter.registry().stop_agent(definition_id)
    }
}

impl std::fmt::Debug for CapabilityDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDispatcher")
            .field("interpreter", &self.interpreter)
            .finish()
    }
}
