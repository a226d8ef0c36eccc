//! Runtime configuration.
//!
//! Loaded from YAML with every field optional, then overridden by
//! `AGENT_RUNTIME_*` environment variables.
//!
//! ```yaml
//! rpc_timeout_ms: 30000
//! max_while_iterations: 1000
//! max_collection_items: 10000
//! require_approval_for_privileged: true
//! definitions_dir: "definitions"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Default bridge timeout (30 seconds).
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;
/// Default ceiling on `while` iterations.
pub const DEFAULT_MAX_WHILE_ITERATIONS: u32 = 1_000;
/// Default ceiling on `forEach` collection size.
pub const DEFAULT_MAX_COLLECTION_ITEMS: usize = 10_000;
/// Origin tag stamped on messages posted by the page-side bridge.
pub const DEFAULT_PAGE_ORIGIN: &str = "agent-runtime-page";
/// Origin tag stamped on messages posted by the privileged endpoint.
pub const DEFAULT_HOST_ORIGIN: &str = "agent-runtime-host";

/// Tunables shared by every component of an execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bridge call timeout in milliseconds.
    pub rpc_timeout_ms: u64,
    /// Hard ceiling for `while` loops; per-action limits may only lower it.
    pub max_while_iterations: u32,
    /// Largest collection a `forEach` or `query` may produce.
    pub max_collection_items: usize,
    /// Whether definitions with privileged code need recorded approval.
    pub require_approval_for_privileged: bool,
    /// Origin the privileged endpoint accepts calls from.
    pub page_origin: String,
    /// Origin the page-side bridge accepts responses from.
    pub host_origin: String,
    /// Directory of YAML/JSON definitions loaded at startup.
    pub definitions_dir: Option<PathBuf>,
    /// HTTP bind address for the monitoring server.
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            max_while_iterations: DEFAULT_MAX_WHILE_ITERATIONS,
            max_collection_items: DEFAULT_MAX_COLLECTION_ITEMS,
            require_approval_for_privileged: true,
            page_origin: DEFAULT_PAGE_ORIGIN.to_string(),
            host_origin: DEFAULT_HOST_ORIGIN.to_string(),
            definitions_dir: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `AGENT_RUNTIME_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENT_RUNTIME_RPC_TIMEOUT_MS") {
            self.rpc_timeout_ms = parse_env("AGENT_RUNTIME_RPC_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("AGENT_RUNTIME_MAX_WHILE_ITERATIONS") {
            self.max_while_iterations = parse_env("AGENT_RUNTIME_MAX_WHILE_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("AGENT_RUNTIME_MAX_COLLECTION_ITEMS") {
            self.max_collection_items = parse_env("AGENT_RUNTIME_MAX_COLLECTION_ITEMS", &v)?;
        }
        if let Some(v) = lookup("AGENT_RUNTIME_REQUIRE_APPROVAL") {
            self.require_approval_for_privileged = parse_env("AGENT_RUNTIME_REQUIRE_APPROVAL", &v)?;
        }
        if let Some(v) = lookup("AGENT_RUNTIME_DEFINITIONS_DIR") {
            self.definitions_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("AGENT_RUNTIME_BIND_ADDR") {
            self.bind_addr = v;
        }
        Ok(self)
    }

    /// Bridge timeout as a [`Duration`].
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RuntimeError::Config(format!("{key}: cannot parse '{value}'")))
}
