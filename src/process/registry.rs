//! Per-context table of running processes.
//!
//! The registry is the single owner of every [`ProcessHandle`] created in an
//! execution context. Stopping removes the handle from the table first and
//! then runs its cleanup outside the lock, inside a fault barrier, so a
//! failing cleanup can neither keep its handle alive nor block its siblings.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use super::handle::{Cleanup, ProcessHandle, ProcessInfo, ProcessType};
use crate::error::RuntimeError;

/// Registry of long-running handles for one execution context.
pub struct ProcessRegistry {
    context_id: String,
    counter: AtomicU64,
    processes: Mutex<HashMap<String, ProcessHandle>>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            context_id: uuid::Uuid::new_v4().to_string(),
            counter: AtomicU64::new(0),
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Id of the execution context this registry belongs to.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Register a process and return its id.
    ///
    /// Ids are `proc-<unix millis>-<counter>`; the counter is monotonic for
    /// the registry's lifetime, so an existing entry is never overwritten.
    pub fn register(
        &self,
        owner_agent_id: &str,
        capability_name: &str,
        process_type: ProcessType,
        cleanup: Cleanup,
        metadata: HashMap<String, Value>,
    ) -> String {
        let mut processes = self.processes.lock();
        let id = loop {
            let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let candidate = format!("proc-{}-{}", Utc::now().timestamp_millis(), seq);
            if !processes.contains_key(&candidate) {
                break candidate;
            }
        };

        processes.insert(
            id.clone(),
            ProcessHandle {
                id: id.clone(),
                owner_agent_id: owner_agent_id.to_string(),
                capability_name: capability_name.to_string(),
                process_type,
                metadata,
                created_at: Utc::now(),
                cleanup,
            },
        );
        drop(processes);

        log::debug!(
            "Registered {} process {} for {}/{}",
            process_type,
            id,
            owner_agent_id,
            capability_name
        );
        id
    }

    /// Stop one process. Returns `false` if the id is unknown.
    pub fn stop(&self, process_id: &str) -> bool {
        let handle = self.processes.lock().remove(process_id);
        match handle {
            Some(handle) => {
                run_cleanup(handle);
                true
            }
            None => false,
        }
    }

    /// Stop every process started by one capability of one agent.
    pub fn stop_capability(&self, agent_id: &str, capability_name: &str) -> usize {
        self.stop_matching(|h| h.owner_agent_id == agent_id && h.capability_name == capability_name)
    }

    /// Stop every process owned by an agent.
    pub fn stop_agent(&self, agent_id: &str) -> usize {
        self.stop_matching(|h| h.owner_agent_id == agent_id)
    }

    /// Stop everything.
    pub fn stop_all(&self) -> usize {
        self.stop_matching(|_| true)
    }

    /// Snapshots of running processes, optionally filtered by owner,
    /// oldest first.
    pub fn list(&self, agent_id: Option<&str>) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self
            .processes
            .lock()
            .values()
            .filter(|h| agent_id.map_or(true, |a| h.owner_agent_id == a))
            .map(ProcessHandle::info)
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Whether the id refers to a running process.
    pub fn is_active(&self, process_id: &str) -> bool {
        self.processes.lock().contains_key(process_id)
    }

    /// Number of running processes.
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    /// Whether no process is running.
    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }

    /// Running process count per type.
    pub fn count_by_type(&self) -> HashMap<ProcessType, usize> {
        let mut counts = HashMap::new();
        for handle in self.processes.lock().values() {
            *counts.entry(handle.process_type).or_insert(0) += 1;
        }
        counts
    }

    fn stop_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ProcessHandle) -> bool,
    {
        let removed: Vec<ProcessHandle> = {
            let mut processes = self.processes.lock();
            let ids: Vec<String> = processes
                .values()
                .filter(|h| predicate(h))
                .map(|h| h.id.clone())
                .collect();
            ids.iter().filter_map(|id| processes.remove(id)).collect()
        };

        let count = removed.len();
        for handle in removed {
            run_cleanup(handle);
        }
        count
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("context_id", &self.context_id)
            .field("processes", &self.len())
            .finish()
    }
}

/// Run a handle's cleanup, containing errors and panics.
fn run_cleanup(handle: ProcessHandle) {
    let ProcessHandle { id, cleanup, .. } = handle;
    let outcome = match catch_unwind(AssertUnwindSafe(cleanup)) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    match outcome {
        None => log::debug!("Stopped process {}", id),
        Some(message) => {
            let err = RuntimeError::ProcessCleanupFailed {
                process_id: id,
                message,
            };
            log::warn!("{}", err);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "cleanup panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_cleanup(counter: &Arc<AtomicUsize>) -> Cleanup {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn noop() -> Cleanup {
        Box::new(|| Ok(()))
    }

    #[test]
    fn test_register_generates_unique_ids() {
        let registry = ProcessRegistry::new();
        let a = registry.register("a", "cap", ProcessType::Interval, noop(), HashMap::new());
        let b = registry.register("a", "cap", ProcessType::Interval, noop(), HashMap::new());

        assert_ne!(a, b);
        assert!(a.starts_with("proc-"));
        assert!(a.ends_with("-1"));
        assert!(b.ends_with("-2"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_second_stop_returns_false_without_cleanup() {
        let registry = ProcessRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = registry.register(
            "a",
            "cap",
            ProcessType::Timeout,
            counting_cleanup(&calls),
            HashMap::new(),
        );

        assert!(registry.is_active(&id));
        assert!(registry.stop(&id));
        assert!(!registry.is_active(&id));
        assert!(!registry.stop(&id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_agent_leaves_other_agents() {
        let registry = ProcessRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for cap in ["one", "two", "three"] {
            registry.register("a", cap, ProcessType::Observer, counting_cleanup(&calls), HashMap::new());
        }
        let other = registry.register("b", "one", ProcessType::Observer, noop(), HashMap::new());

        assert_eq!(registry.stop_agent("a"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_active(&other));
        assert_eq!(registry.stop_agent("a"), 0);
    }

    #[test]
    fn test_stop_capability_scopes_to_agent_and_capability() {
        let registry = ProcessRegistry::new();
        registry.register("a", "watch", ProcessType::Interval, noop(), HashMap::new());
        registry.register("a", "other", ProcessType::Interval, noop(), HashMap::new());
        registry.register("b", "watch", ProcessType::Interval, noop(), HashMap::new());

        assert_eq!(registry.stop_capability("a", "watch"), 1);
        assert_eq!(registry.list(Some("a")).len(), 1);
        assert_eq!(registry.list(Some("b")).len(), 1);
    }

    #[test]
    fn test_failing_cleanup_does_not_block_siblings() {
        let registry = ProcessRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(
            "a",
            "cap",
            ProcessType::Socket,
            Box::new(|| Err(anyhow::anyhow!("socket already closed"))),
            HashMap::new(),
        );
        registry.register(
            "a",
            "cap",
            ProcessType::Custom,
            Box::new(|| panic!("cleanup blew up")),
            HashMap::new(),
        );
        registry.register("a", "cap", ProcessType::Custom, counting_cleanup(&calls), HashMap::new());

        assert_eq!(registry.stop_all(), 3);
        assert!(registry.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_may_reenter_registry() {
        let registry = Arc::new(ProcessRegistry::new());
        let inner = registry.register("a", "cap", ProcessType::Timeout, noop(), HashMap::new());
        let reg = Arc::clone(&registry);
        let outer = registry.register(
            "a",
            "cap",
            ProcessType::Custom,
            Box::new(move || {
                reg.stop(&inner);
                Ok(())
            }),
            HashMap::new(),
        );

        assert!(registry.stop(&outer));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_filters_and_counts() {
        let registry = ProcessRegistry::new();
        let mut meta = HashMap::new();
        meta.insert("intervalMs".to_string(), serde_json::json!(500));
        registry.register("a", "cap", ProcessType::Interval, noop(), meta);
        registry.register("b", "cap", ProcessType::Observer, noop(), HashMap::new());

        let all = registry.list(None);
        assert_eq!(all.len(), 2);
        let mine = registry.list(Some("a"));
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].metadata["intervalMs"], 500);
        assert_eq!(registry.count_by_type()[&ProcessType::Observer], 1);
    }

    #[test]
    fn test_fresh_registry_is_empty() {
        let old = ProcessRegistry::new();
        let id = old.register("a", "cap", ProcessType::Interval, noop(), HashMap::new());
        let fresh = ProcessRegistry::new();

        assert!(fresh.is_empty());
        assert!(!fresh.is_active(&id));
        assert!(!fresh.stop(&id));
        assert_ne!(old.context_id(), fresh.context_id());
    }

    #[test]
    fn test_process_info_serializes_type_tag() {
        let registry = ProcessRegistry::new();
        registry.register("a", "cap", ProcessType::IntersectionObserver, noop(), HashMap::new());
        let json = serde_json::to_value(&registry.list(None)[0]).unwrap();
        assert_eq!(json["type"], "intersectionObserver");
        assert_eq!(json["ownerAgentId"], "a");
    }
}
