//! Process handle types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of long-running side effect a handle stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessType {
    Observer,
    Interval,
    Timeout,
    EventListener,
    Socket,
    IntersectionObserver,
    FrameLoop,
    Custom,
}

impl ProcessType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Interval => "interval",
            Self::Timeout => "timeout",
            Self::EventListener => "eventListener",
            Self::Socket => "socket",
            Self::IntersectionObserver => "intersectionObserver",
            Self::FrameLoop => "frameLoop",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Teardown closure captured when a process is registered.
///
/// Runs at most once. Errors and panics are contained by the registry.
pub type Cleanup = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// A registry entry: one running side effect plus the means to stop it.
pub struct ProcessHandle {
    pub id: String,
    pub owner_agent_id: String,
    pub capability_name: String,
    pub process_type: ProcessType,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub(crate) cleanup: Cleanup,
}

impl ProcessHandle {
    /// Serializable snapshot without the cleanup closure.
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            id: self.id.clone(),
            owner_agent_id: self.owner_agent_id.clone(),
            capability_name: self.capability_name.clone(),
            process_type: self.process_type,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("owner_agent_id", &self.owner_agent_id)
            .field("capability_name", &self.capability_name)
            .field("process_type", &self.process_type)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// What monitoring code sees of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub id: String,
    pub owner_agent_id: String,
    pub capability_name: String,
    #[serde(rename = "type")]
    pub process_type: ProcessType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}
