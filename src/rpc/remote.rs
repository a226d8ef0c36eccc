//! Store implementations that live in the page context and read through
//! the bridge. The page never holds definitions or credentials itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::bridge::RpcBridge;
use crate::definitions::{AgentDefinition, CredentialStore, DefinitionStore};
use crate::error::{Result, RuntimeError};

/// `DefinitionStore` backed by `definitions.*` calls.
#[derive(Debug, Clone)]
pub struct RemoteDefinitionStore {
    bridge: Arc<RpcBridge>,
}

impl RemoteDefinitionStore {
    pub fn new(bridge: Arc<RpcBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl DefinitionStore for RemoteDefinitionStore {
    async fn load_definition(&self, id: &str) -> Result<Option<Arc<AgentDefinition>>> {
        match self.bridge.call("definitions.get", json!({ "id": id })).await? {
            Value::Null => Ok(None),
            raw => Ok(Some(Arc::new(AgentDefinition::from_json(raw)?))),
        }
    }

    async fn list_definitions(&self) -> Result<Vec<Arc<AgentDefinition>>> {
        let raw = self.bridge.call("definitions.list", json!({})).await?;
        let Value::Array(items) = raw else {
            return Err(RuntimeError::Transport(
                "definitions.list did not return an array".into(),
            ));
        };
        items
            .into_iter()
            .map(|item| AgentDefinition::from_json(item).map(Arc::new))
            .collect()
    }

    async fn save_definition(&self, definition: AgentDefinition) -> Result<()> {
        let definition = serde_json::to_value(&definition)?;
        self.bridge
            .call("definitions.save", json!({ "definition": definition }))
            .await?;
        Ok(())
    }
}

/// `CredentialStore` backed by `config.*` calls.
#[derive(Debug, Clone)]
pub struct RemoteCredentialStore {
    bridge: Arc<RpcBridge>,
}

impl RemoteCredentialStore {
    pub fn new(bridge: Arc<RpcBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl CredentialStore for RemoteCredentialStore {
    async fn is_configured(&self, definition_id: &str) -> Result<bool> {
        let raw = self
            .bridge
            .call("config.isConfigured", json!({ "definitionId": definition_id }))
            .await?;
        Ok(raw.as_bool().unwrap_or(false))
    }

    async fn get_config(&self, definition_id: &str) -> Result<Option<HashMap<String, String>>> {
        let raw = self
            .bridge
            .call("config.get", json!({ "definitionId": definition_id }))
            .await?;
        let Value::Object(map) = raw else {
            return Ok(None);
        };
        // Non-string values are stringified; the dependency check only
        // cares that required fields are present and non-empty.
        Ok(Some(
            map.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect(),
        ))
    }
}
