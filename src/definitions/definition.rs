//! Agent and client definitions: the unit of YAML-importable behavior.
//!
//! A definition bundles named capabilities, each implemented as a tree of
//! declarative actions, plus the other definitions it depends on.
//!
//! Example YAML:
//! ```yaml
//! definition:
//!   id: "overlay-remover"
//!   name: "Overlay Remover"
//!   version: "1.0.0"
//!   capabilities:
//!     - name: "remove_overlays_once"
//!       description: "Hide cookie banners and modal overlays"
//!       actions:
//!         - type: addStyle
//!           css: ".overlay { display: none !important; }"
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::interpreter::Action;

/// Whether a definition is a user-facing agent or a credentialed client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    #[default]
    Agent,
    /// Clients hold credentials other definitions depend on.
    Client,
}

/// An agent or client definition.
///
/// Immutable once loaded; updates replace the whole definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Unique identifier (e.g. `"overlay-remover"`)
    pub id: String,

    /// Display name
    pub name: String,

    /// Semantic version
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub kind: DefinitionKind,

    #[serde(default)]
    pub description: Option<String>,

    /// Ids of definitions that must be configured before any capability runs
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub capabilities: Vec<CapabilityDefinition>,

    /// Set when any capability runs untrusted inline code
    #[serde(default)]
    pub contains_privileged_code: bool,

    /// Config fields a stored config for this definition must carry
    #[serde(default)]
    pub config_fields: Vec<ConfigField>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A named, parameterized unit of behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Declared parameter of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub required: bool,

    /// Applied when the caller omits the parameter
    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Primitive parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Whether `value` is an instance of this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A config/credential field a client definition expects to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub name: String,

    #[serde(default = "default_true")]
    pub required: bool,

    /// Hint for settings UIs; the value is still bound like any other field
    #[serde(default)]
    pub secret: bool,
}

fn default_true() -> bool {
    true
}

impl AgentDefinition {
    /// Parse a definition from a YAML string.
    ///
    /// Accepts either a bare definition or one nested under `definition:`.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let value = match value.get("definition") {
            Some(inner) => inner.clone(),
            None => value,
        };
        let definition: AgentDefinition = serde_yaml::from_value(value)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Parse a definition from a JSON value.
    pub fn from_json(value: Value) -> Result<Self> {
        let definition: AgentDefinition = serde_json::from_value(value)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Look up a capability by name.
    pub fn capability(&self, name: &str) -> Option<&CapabilityDefinition> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    /// Names of all capabilities.
    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names of the config fields that must be present and non-empty.
    pub fn required_config_fields(&self) -> impl Iterator<Item = &str> {
        self.config_fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Whether any capability runs inline script, declared or not.
    pub fn runs_script(&self) -> bool {
        self.capabilities
            .iter()
            .flat_map(|c| c.actions.iter())
            .any(Action::runs_script)
    }

    /// Structural checks run before a definition enters a store.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RuntimeError::Definition("definition id is empty".into()));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(RuntimeError::Definition(format!(
                "definition '{}' depends on itself",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for cap in &self.capabilities {
            if cap.name.trim().is_empty() {
                return Err(RuntimeError::Definition(format!(
                    "definition '{}' has a capability without a name",
                    self.id
                )));
            }
            if !seen.insert(cap.name.as_str()) {
                return Err(RuntimeError::Definition(format!(
                    "definition '{}' declares capability '{}' twice",
                    self.id, cap.name
                )));
            }

            let mut params: HashMap<&str, usize> = HashMap::new();
            for p in &cap.parameters {
                *params.entry(p.name.as_str()).or_insert(0) += 1;
            }
            if let Some((dup, _)) = params.iter().find(|(_, n)| **n > 1) {
                return Err(RuntimeError::Definition(format!(
                    "capability '{}' declares parameter '{}' twice",
                    cap.name, dup
                )));
            }
        }
        Ok(())
    }
}

/// Wrapper for YAML files holding a `definitions:` list.
#[derive(Debug, Deserialize)]
pub(crate) struct DefinitionListWrapper {
    pub definitions: Vec<AgentDefinition>,
}
