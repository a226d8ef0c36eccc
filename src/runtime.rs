//! Context-scoped runtime objects.
//!
//! A [`PrivilegedContext`] owns the stores and the method router. Each page
//! gets a [`PageContext`] with its own process registry, bridge, interpreter
//! and dispatcher. Reloading a page means dropping its `PageContext`, which
//! stops every process it started.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::definitions::{InMemoryCredentialStore, InMemoryDefinitionStore};
use crate::dispatcher::{ApprovalMemory, CallContext, CapabilityDispatcher, PolicyGate};
use crate::host::PageHost;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::process::{ProcessInfo, ProcessRegistry};
use crate::rpc::{
    builtin_router, port_pair, InMemoryKeyValueStore, MethodRouter, PrivilegedEndpoint,
    RemoteCredentialStore, RemoteDefinitionStore, RpcBridge,
};

/// The trusted side: definitions, credentials, storage and the router
/// that exposes them.
pub struct PrivilegedContext {
    config: Arc<RuntimeConfig>,
    definitions: Arc<InMemoryDefinitionStore>,
    credentials: Arc<InMemoryCredentialStore>,
    storage: Arc<InMemoryKeyValueStore>,
    router: Arc<MethodRouter>,
}

impl PrivilegedContext {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryDefinitionStore::new()),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryKeyValueStore::new()),
        )
    }

    pub fn with_stores(
        config: Arc<RuntimeConfig>,
        definitions: Arc<InMemoryDefinitionStore>,
        credentials: Arc<InMemoryCredentialStore>,
        storage: Arc<InMemoryKeyValueStore>,
    ) -> Self {
        let router = builtin_router(storage.clone(), definitions.clone(), credentials.clone());
        log::debug!("Privileged context ready: {:?}", router);
        Self {
            config,
            definitions,
            credentials,
            storage,
            router: Arc::new(router),
        }
    }

    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    pub fn definitions(&self) -> &Arc<InMemoryDefinitionStore> {
        &self.definitions
    }

    pub fn credentials(&self) -> &Arc<InMemoryCredentialStore> {
        &self.credentials
    }

    pub fn storage(&self) -> &Arc<InMemoryKeyValueStore> {
        &self.storage
    }

    pub fn router(&self) -> &Arc<MethodRouter> {
        &self.router
    }

    /// Attach a page: serve its bridge and build its context.
    ///
    /// The page reads definitions and credentials only through the bridge.
    pub fn open_page(&self, host: Arc<dyn PageHost>, policy: Arc<dyn PolicyGate>) -> PageContext {
        let (page_port, host_port) = port_pair();
        let serve = PrivilegedEndpoint::new(Arc::clone(&self.router), &self.config).spawn(host_port);
        let bridge = Arc::new(RpcBridge::connect(page_port, &self.config));

        let mut page = PageContext::new(Arc::clone(&self.config), host, bridge, policy);
        page.serve = Some(serve);
        page
    }

    /// [`open_page`](Self::open_page) with an approval gate built from the config.
    pub fn open_page_default(&self, host: Arc<dyn PageHost>) -> PageContext {
        let policy = Arc::new(ApprovalMemory::new(self.config.require_approval_for_privileged));
        self.open_page(host, policy)
    }
}

impl std::fmt::Debug for PrivilegedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedContext")
            .field("definitions", &self.definitions.len())
            .field("router", &self.router)
            .finish()
    }
}

/// Everything one page owns.
pub struct PageContext {
    config: Arc<RuntimeConfig>,
    registry: Arc<ProcessRegistry>,
    bridge: Arc<RpcBridge>,
    dispatcher: CapabilityDispatcher,
    serve: Option<JoinHandle<()>>,
}

impl PageContext {
    /// Build a page context over an existing bridge.
    pub fn new(
        config: Arc<RuntimeConfig>,
        host: Arc<dyn PageHost>,
        bridge: Arc<RpcBridge>,
        policy: Arc<dyn PolicyGate>,
    ) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let interpreter = Interpreter::new(host, Arc::clone(&registry), Arc::clone(&config))
            .with_bridge(Arc::clone(&bridge));
        let dispatcher = CapabilityDispatcher::new(
            Arc::new(RemoteDefinitionStore::new(Arc::clone(&bridge))),
            Arc::new(RemoteCredentialStore::new(Arc::clone(&bridge))),
            policy,
            interpreter,
        );
        log::debug!("Page context {} opened", registry.context_id());

        Self {
            config,
            registry,
            bridge,
            dispatcher,
            serve: None,
        }
    }

    pub fn context_id(&self) -> &str {
        self.registry.context_id()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<RpcBridge> {
        &self.bridge
    }

    pub fn dispatcher(&self) -> &CapabilityDispatcher {
        &self.dispatcher
    }

    pub async fn execute_capability(
        &self,
        definition_id: &str,
        capability_name: &str,
        params: HashMap<String, Value>,
        call: &CallContext,
    ) -> ExecutionResult {
        self.dispatcher
            .execute_capability(definition_id, capability_name, params, call)
            .await
    }

    pub fn list_processes(&self, agent_id: Option<&str>) -> Vec<ProcessInfo> {
        self.registry.list(agent_id)
    }

    pub fn stop_process(&self, process_id: &str) -> bool {
        self.registry.stop(process_id)
    }

    pub fn stop_agent(&self, agent_id: &str) -> usize {
        self.registry.stop_agent(agent_id)
    }

    pub fn stop_all(&self) -> usize {
        self.registry.stop_all()
    }

    /// Stop every process and disconnect. Returns how many were stopped.
    pub fn teardown(self) -> usize {
        let stopped = self.registry.stop_all();
        log::info!(
            "Page context {} torn down ({} processes stopped)",
            self.context_id(),
            stopped
        );
        stopped
    }
}

impl Drop for PageContext {
    fn drop(&mut self) {
        let stopped = self.registry.stop_all();
        if stopped > 0 {
            log::debug!(
                "Page context {} dropped with {} live processes",
                self.registry.context_id(),
                stopped
            );
        }
        if let Some(serve) = self.serve.take() {
            serve.abort();
        }
    }
}

impl std::fmt::Debug for PageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageContext")
            .field("context_id", &self.context_id())
            .field("processes", &self.registry.len())
            .field("bridge", &self.bridge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::AgentDefinition;
    use crate::host::HeadlessHost;
    use crate::process::ProcessType;
    use crate::rpc::KeyValueStore;
    use serde_json::json;

    const TICKER: &str = r#"
id: ticker
name: Ticker
capabilities:
  - name: start
    actions:
      - type: callApi
        method: storage.get
        params: { keys: greeting }
        storeAs: stored
      - type: startProcess
        processType: interval
        options: { intervalMs: 1000 }
        actions:
          - type: notify
            title: Ticker
            message: "{{stored.greeting}}"
      - type: startProcess
        processType: observer
        options: { selector: body }
"#;

    fn privileged() -> PrivilegedContext {
        let ctx = PrivilegedContext::new(Arc::new(RuntimeConfig::default()));
        ctx.definitions()
            .register(AgentDefinition::from_yaml(TICKER).unwrap())
            .unwrap();
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_runs_capability_through_bridge() {
        let privileged = privileged();
        privileged
            .storage()
            .set(json!({"greeting": "hello"}).as_object().unwrap().clone())
            .await
            .unwrap();
        let host = Arc::new(HeadlessHost::new());
        let page = privileged.open_page_default(host.clone());

        let result = page
            .execute_capability("ticker", "start", HashMap::new(), &CallContext::default())
            .await;
        assert!(result.success, "{:?}", result);
        assert_eq!(page.list_processes(Some("ticker")).len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(host.notifications()[0].message, "hello");

        assert_eq!(page.teardown(), 2);
        assert_eq!(host.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_page_stops_processes() {
        let privileged = privileged();
        let host = Arc::new(HeadlessHost::new());
        let page = privileged.open_page_default(host.clone());

        let result = page
            .execute_capability("ticker", "start", HashMap::new(), &CallContext::default())
            .await;
        assert!(result.success);
        assert_eq!(host.subscription_count(), 1);

        let registry = Arc::clone(page.registry());
        drop(page);
        assert!(registry.is_empty());
        assert_eq!(host.subscription_count(), 0);
        assert_eq!(host.fire(ProcessType::Observer, json!({})), 0);
    }

    #[tokio::test]
    async fn test_pages_have_separate_registries() {
        let privileged = privileged();
        let a = privileged.open_page_default(Arc::new(HeadlessHost::new()));
        let b = privileged.open_page_default(Arc::new(HeadlessHost::new()));

        a.execute_capability("ticker", "start", HashMap::new(), &CallContext::default())
            .await;
        assert_eq!(a.registry().len(), 2);
        assert!(b.registry().is_empty());
        assert_ne!(a.context_id(), b.context_id());
        assert_eq!(b.stop_agent("ticker"), 0);
        assert_eq!(a.stop_all(), 2);
    }
}
