//! Definition store: where the dispatcher looks definitions up.
//!
//! The in-memory store loads definitions from:
//! 1. Programmatic registration
//! 2. YAML/JSON files in a definitions directory (recursive)
//! 3. `save_definition` calls (e.g. from the settings UI over the bridge)

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::definition::{AgentDefinition, DefinitionListWrapper};
use crate::error::{Result, RuntimeError};

/// Key-value access to definitions, owned outside the execution runtime.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn load_definition(&self, id: &str) -> Result<Option<Arc<AgentDefinition>>>;

    async fn list_definitions(&self) -> Result<Vec<Arc<AgentDefinition>>>;

    /// Insert or replace a whole definition.
    async fn save_definition(&self, definition: AgentDefinition) -> Result<()>;
}

/// Definitions held in process memory, indexed by id.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<String, Arc<AgentDefinition>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a definition, replacing any previous version.
    pub fn register(&self, definition: AgentDefinition) -> Result<()> {
        definition.validate()?;
        let id = definition.id.clone();
        let previous = self
            .definitions
            .write()
            .insert(id.clone(), Arc::new(definition));
        if let Some(prev) = previous {
            log::info!("Replaced definition {} (was version {})", id, prev.version);
        } else {
            log::debug!("Registered definition {}", id);
        }
        Ok(())
    }

    /// Register definitions from a file.
    ///
    /// YAML files may hold a single definition or a `definitions:` list;
    /// `.json` files hold a single definition.
    pub fn register_from_file(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Definition(format!("{}: {}", path.display(), e)))?;

        if path.extension().map_or(false, |ext| ext == "json") {
            let value: serde_json::Value = serde_json::from_str(&content)?;
            self.register(AgentDefinition::from_json(value)?)?;
            return Ok(1);
        }

        if let Ok(definition) = AgentDefinition::from_yaml(&content) {
            self.register(definition)?;
            return Ok(1);
        }

        let list: DefinitionListWrapper = serde_yaml::from_str(&content)?;
        let count = list.definitions.len();
        for definition in list.definitions {
            self.register(definition)?;
        }
        Ok(count)
    }

    /// Load every `.yaml`, `.yml` and `.json` file under `dir`.
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn load_directory(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        let entries = std::fs::read_dir(dir)
            .map_err(|e| RuntimeError::Definition(format!("{}: {}", dir.display(), e)))?;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            if path.is_dir() {
                count += self.load_directory(&path)?;
            } else if path
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml" || ext == "json")
            {
                match self.register_from_file(&path) {
                    Ok(n) => count += n,
                    Err(e) => {
                        log::warn!("Failed to load definition from {}: {}", path.display(), e);
                    }
                }
            }
        }

        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.definitions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.definitions.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn load_definition(&self, id: &str) -> Result<Option<Arc<AgentDefinition>>> {
        Ok(self.get(id))
    }

    async fn list_definitions(&self) -> Result<Vec<Arc<AgentDefinition>>> {
        let mut all: Vec<_> = self.definitions.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn save_definition(&self, definition: AgentDefinition) -> Result<()> {
        self.register(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, version: &str) -> AgentDefinition {
        AgentDefinition::from_json(serde_json::json!({
            "id": id,
            "name": id,
            "version": version,
            "capabilities": [{"name": "noop", "actions": []}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_replaces_whole_definition() {
        let store = InMemoryDefinitionStore::new();
        store.save_definition(definition("a", "1.0.0")).await.unwrap();
        let first = store.load_definition("a").await.unwrap().unwrap();

        store.save_definition(definition("a", "2.0.0")).await.unwrap();
        let second = store.load_definition("a").await.unwrap().unwrap();

        assert_eq!(first.version, "1.0.0");
        assert_eq!(second.version, "2.0.0");
        assert_eq!(store.len(), 1);
        assert!(store.load_definition("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("single.yaml"),
            "definition:\n  id: one\n  name: One\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("list.yml"),
            "definitions:\n  - id: two\n    name: Two\n  - id: three\n    name: Three\n",
        )
        .unwrap();
        let nested = dir.path().join("clients");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join("client.json"),
            r#"{"id": "four", "name": "Four", "kind": "client"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "definition: [not, a, map]").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let store = InMemoryDefinitionStore::new();
        let count = store.load_directory(dir.path()).unwrap();

        assert_eq!(count, 4);
        assert!(store.get("four").is_some());
    }

    #[test]
    fn test_missing_directory_loads_nothing() {
        let store = InMemoryDefinitionStore::new();
        assert_eq!(store.load_directory(Path::new("/nonexistent/defs")).unwrap(), 0);
    }

    #[test]
    fn test_bundled_definitions_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("definitions");
        let store = InMemoryDefinitionStore::new();
        assert_eq!(store.load_directory(&dir).unwrap(), 3);

        let remover = store.get("overlay-remover").unwrap();
        assert!(!remover.runs_script());
        assert_eq!(
            remover.capability_names(),
            vec!["remove_overlays_once", "keep_removing", "remembered_selector"]
        );
        assert_eq!(store.get("page-reporter").unwrap().dependencies, vec!["slack"]);
    }
}
