//! `definitions.*`: the privileged definition store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::definitions::{AgentDefinition, DefinitionStore};
use crate::rpc::router::{NamespaceHandler, RouteError};

pub struct DefinitionsNamespace {
    store: Arc<dyn DefinitionStore>,
}

impl DefinitionsNamespace {
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NamespaceHandler for DefinitionsNamespace {
    fn namespace(&self) -> &str {
        "definitions"
    }

    async fn handle(&self, action: &str, params: Value) -> Result<Value, RouteError> {
        match action {
            // A missing definition is `null`, not an error.
            "get" => {
                let id = required_str(&params, "id")?;
                match self.store.load_definition(id).await? {
                    Some(definition) => to_json(definition.as_ref()),
                    None => Ok(Value::Null),
                }
            }
            "list" => {
                let definitions = self.store.list_definitions().await?;
                let list = definitions
                    .iter()
                    .map(|d| to_json(d.as_ref()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(list))
            }
            "save" => {
                let raw = params.get("definition").cloned().ok_or_else(|| {
                    RouteError::InvalidParams("definitions.save needs a 'definition'".into())
                })?;
                let definition = AgentDefinition::from_json(raw)
                    .map_err(|e| RouteError::InvalidParams(e.to_string()))?;
                let id = definition.id.clone();
                self.store.save_definition(definition).await?;
                Ok(serde_json::json!({ "id": id }))
            }
            other => Err(RouteError::UnknownAction(other.to_string())),
        }
    }
}

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, RouteError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RouteError::InvalidParams(format!("missing string param '{key}'")))
}

fn to_json(definition: &AgentDefinition) -> Result<Value, RouteError> {
    serde_json::to_value(definition).map_err(|e| RouteError::Failed(e.to_string()))
}
