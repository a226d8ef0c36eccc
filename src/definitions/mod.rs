//! # Definitions
//!
//! Agent and client definitions, and the stores they are read from.
//!
//! ## Resolution flow
//!
//! 1. A definition YAML is loaded at startup (`load_directory`) or saved
//!    from the settings UI (`save_definition`)
//! 2. The dispatcher asks its `DefinitionStore` for the definition id
//! 3. Each entry in `dependencies` is checked against the `CredentialStore`
//!    and the dependency's own `configFields`
//! 4. The named capability's action tree is handed to the interpreter

pub mod credentials;
pub mod definition;
pub mod store;

pub use credentials::{CredentialStore, InMemoryCredentialStore};
pub use definition::{
    AgentDefinition, CapabilityDefinition, ConfigField, DefinitionKind, ParamType, ParameterSpec,
};
pub use store::{DefinitionStore, InMemoryDefinitionStore};
