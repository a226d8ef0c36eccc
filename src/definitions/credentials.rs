//! Credential/config store boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

/// Stored configuration for client definitions, keyed by definition id.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn is_configured(&self, definition_id: &str) -> Result<bool>;

    async fn get_config(&self, definition_id: &str) -> Result<Option<HashMap<String, String>>>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    configs: DashMap<String, HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (replace) the config for a definition.
    pub fn set_config(&self, definition_id: &str, config: HashMap<String, String>) {
        self.configs.insert(definition_id.to_string(), config);
    }

    pub fn remove_config(&self, definition_id: &str) -> bool {
        self.configs.remove(definition_id).is_some()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn is_configured(&self, definition_id: &str) -> Result<bool> {
        Ok(self.configs.contains_key(definition_id))
    }

    async fn get_config(&self, definition_id: &str) -> Result<Option<HashMap<String, String>>> {
        Ok(self.configs.get(definition_id).map(|c| c.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_remove() {
        let store = InMemoryCredentialStore::new();
        assert!(!store.is_configured("slack").await.unwrap());

        store.set_config("slack", HashMap::from([("token".to_string(), "xoxb".to_string())]));
        assert!(store.is_configured("slack").await.unwrap());
        assert_eq!(store.get_config("slack").await.unwrap().unwrap()["token"], "xoxb");

        assert!(store.remove_config("slack"));
        assert!(store.get_config("slack").await.unwrap().is_none());
    }
}
