//! Built-in privileged namespaces.
//!
//! | Namespace     | Actions                          | Backend             |
//! |---------------|----------------------------------|---------------------|
//! | `storage`     | `get`, `set`, `remove`, `clear`  | [`KeyValueStore`]   |
//! | `definitions` | `get`, `list`, `save`            | `DefinitionStore`   |
//! | `config`      | `isConfigured`, `get`            | `CredentialStore`   |

pub mod config;
pub mod definitions;
pub mod storage;

use std::sync::Arc;

pub use config::ConfigNamespace;
pub use definitions::DefinitionsNamespace;
pub use storage::{InMemoryKeyValueStore, KeyValueStore, StorageNamespace};

use super::router::MethodRouter;
use crate::definitions::{CredentialStore, DefinitionStore};

/// A router with every built-in namespace registered.
pub fn builtin_router(
    storage: Arc<dyn KeyValueStore>,
    definitions: Arc<dyn DefinitionStore>,
    credentials: Arc<dyn CredentialStore>,
) -> MethodRouter {
    let mut router = MethodRouter::new();
    router.register(Arc::new(StorageNamespace::new(storage)));
    router.register(Arc::new(DefinitionsNamespace::new(definitions)));
    router.register(Arc::new(ConfigNamespace::new(credentials)));
    router
}
