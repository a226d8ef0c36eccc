//! `storage.*`: key-value storage owned by the privileged context.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::rpc::router::{NamespaceHandler, RouteError};

/// Key-value backend behind the `storage` namespace.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Values for `keys`, or every entry when `keys` is `None`.
    /// Missing keys are absent from the result.
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>>;

    async fn set(&self, items: Map<String, Value>) -> Result<()>;

    async fn remove(&self, keys: &[String]) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, Value>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        match keys {
            Some(keys) => {
                for key in keys {
                    if let Some(value) = self.entries.get(key) {
                        out.insert(key.clone(), value.value().clone());
                    }
                }
            }
            None => {
                for entry in self.entries.iter() {
                    out.insert(entry.key().clone(), entry.value().clone());
                }
            }
        }
        Ok(out)
    }

    async fn set(&self, items: Map<String, Value>) -> Result<()> {
        for (key, value) in items {
            self.entries.insert(key, value);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

pub struct StorageNamespace {
    store: Arc<dyn KeyValueStore>,
}

impl StorageNamespace {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NamespaceHandler for StorageNamespace {
    fn namespace(&self) -> &str {
        "storage"
    }

    async fn handle(&self, action: &str, params: Value) -> std::result::Result<Value, RouteError> {
        match action {
            "get" => {
                let keys = keys_param(params.get("keys"), true)?;
                let found = self.store.get(keys.as_deref()).await?;
                Ok(Value::Object(found))
            }
            "set" => {
                let items = match params.get("items") {
                    Some(Value::Object(items)) => items.clone(),
                    _ => {
                        return Err(RouteError::InvalidParams(
                            "storage.set needs an 'items' object".into(),
                        ))
                    }
                };
                self.store.set(items).await?;
                Ok(Value::Null)
            }
            "remove" => {
                let keys = keys_param(params.get("keys"), false)?.unwrap_or_default();
                self.store.remove(&keys).await?;
                Ok(Value::Null)
            }
            "clear" => {
                self.store.clear().await?;
                Ok(Value::Null)
            }
            other => Err(RouteError::UnknownAction(other.to_string())),
        }
    }
}

/// Accept `"k"`, `["k", ...]`, or (when `optional`) nothing / `null`.
fn keys_param(
    keys: Option<&Value>,
    optional: bool,
) -> std::result::Result<Option<Vec<String>>, RouteError> {
    match keys {
        None | Some(Value::Null) if optional => Ok(None),
        Some(Value::String(key)) => Ok(Some(vec![key.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    RouteError::InvalidParams(format!("storage key must be a string, got {v}"))
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Some),
        _ => Err(RouteError::InvalidParams(
            "'keys' must be a string or an array of strings".into(),
        )),
    }
}
