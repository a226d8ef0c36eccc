//! `config.*`: stored client configs. Read-only from the page.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::definitions::required_str;
use crate::definitions::CredentialStore;
use crate::rpc::router::{NamespaceHandler, RouteError};

pub struct ConfigNamespace {
    store: Arc<dyn CredentialStore>,
}

impl ConfigNamespace {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NamespaceHandler for ConfigNamespace {
    fn namespace(&self) -> &str {
        "config"
    }

    async fn handle(&self, action: &str, params: Value) -> Result<Value, RouteError> {
        match action {
            "isConfigured" => {
                let id = required_str(&params, "definitionId")?;
                Ok(Value::Bool(self.store.is_configured(id).await?))
            }
            "get" => {
                let id = required_str(&params, "definitionId")?;
                Ok(match self.store.get_config(id).await? {
                    Some(config) => json!(config),
                    None => Value::Null,
                })
            }
            other => Err(RouteError::UnknownAction(other.to_string())),
        }
    }
}
