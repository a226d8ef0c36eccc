//! Page host: the untrusted page surface the interpreter acts on.
//!
//! The interpreter never touches the page directly. Styles, notifications,
//! inline scripts, element queries and event subscriptions all go through
//! [`PageHost`]. Sandboxing inline scripts is the host's business.
//!
//! [`HeadlessHost`] records every effect in memory. It backs the server
//! binary and the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::process::{Cleanup, ProcessType};

/// Callback a host fires each time a subscribed event happens.
pub type Trigger = Arc<dyn Fn(Value) + Send + Sync>;

/// Operations the page context exposes to agents.
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Inject a stylesheet, replacing any previous one with the same id.
    async fn add_style(&self, id: Option<&str>, css: &str) -> Result<()>;

    async fn notify(&self, title: &str, message: &str) -> Result<()>;

    /// Run inline code verbatim and return its completion value.
    async fn execute_script(&self, code: &str) -> Result<Value>;

    /// Elements matching a selector, as JSON descriptions.
    async fn query(&self, selector: &str) -> Result<Vec<Value>>;

    /// Start an event-driven effect (observer, listener, socket, ...).
    ///
    /// The returned cleanup must detach the subscription.
    fn subscribe(&self, process_type: ProcessType, options: &Value, trigger: Trigger)
        -> Result<Cleanup>;
}

/// A notification shown by [`HeadlessHost`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

struct Subscription {
    process_type: ProcessType,
    options: Value,
    trigger: Trigger,
}

/// In-memory host that records effects instead of rendering them.
#[derive(Default)]
pub struct HeadlessHost {
    styles: Mutex<Vec<(Option<String>, String)>>,
    notifications: Mutex<Vec<Notification>>,
    scripts: Mutex<Vec<String>>,
    elements: Mutex<HashMap<String, Vec<Value>>>,
    failing_scripts: Mutex<Vec<String>>,
    subscriptions: Arc<Mutex<HashMap<u64, Subscription>>>,
    next_subscription: AtomicU64,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `query(selector)` return `elements`.
    pub fn set_elements(&self, selector: &str, elements: Vec<Value>) {
        self.elements.lock().insert(selector.to_string(), elements);
    }

    /// Make every script containing `marker` fail.
    pub fn fail_scripts_containing(&self, marker: &str) {
        self.failing_scripts.lock().push(marker.to_string());
    }

    /// Stylesheets currently applied, in insertion order.
    pub fn styles(&self) -> Vec<String> {
        self.styles.lock().iter().map(|(_, css)| css.clone()).collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Scripts executed so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Fire every live subscription of `process_type` with `event`.
    ///
    /// Returns how many triggers ran.
    pub fn fire(&self, process_type: ProcessType, event: Value) -> usize {
        let triggers: Vec<Trigger> = self
            .subscriptions
            .lock()
            .values()
            .filter(|s| s.process_type == process_type)
            .map(|s| Arc::clone(&s.trigger))
            .collect();
        for trigger in &triggers {
            trigger(event.clone());
        }
        triggers.len()
    }

    /// Options of live subscriptions of `process_type`.
    pub fn subscription_options(&self, process_type: ProcessType) -> Vec<Value> {
        self.subscriptions
            .lock()
            .values()
            .filter(|s| s.process_type == process_type)
            .map(|s| s.options.clone())
            .collect()
    }
}

#[async_trait]
impl PageHost for HeadlessHost {
    async fn add_style(&self, id: Option<&str>, css: &str) -> Result<()> {
        let mut styles = self.styles.lock();
        if let Some(id) = id {
            styles.retain(|(existing, _)| existing.as_deref() != Some(id));
        }
        styles.push((id.map(str::to_string), css.to_string()));
        Ok(())
    }

    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        log::info!("Notification: {}: {}", title, message);
        self.notifications.lock().push(Notification {
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn execute_script(&self, code: &str) -> Result<Value> {
        self.scripts.lock().push(code.to_string());
        let failing = self
            .failing_scripts
            .lock()
            .iter()
            .any(|marker| code.contains(marker.as_str()));
        if failing {
            return Err(RuntimeError::Host(format!("script threw: {}", code)));
        }
        Ok(Value::Null)
    }

    async fn query(&self, selector: &str) -> Result<Vec<Value>> {
        Ok(self.elements.lock().get(selector).cloned().unwrap_or_default())
    }

    fn subscribe(
        &self,
        process_type: ProcessType,
        options: &Value,
        trigger: Trigger,
    ) -> Result<Cleanup> {
        let key = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(
            key,
            Subscription {
                process_type,
                options: options.clone(),
                trigger,
            },
        );
        let table = Arc::clone(&self.subscriptions);
        Ok(Box::new(move || {
            table.lock().remove(&key);
            Ok(())
        }))
    }
}

impl std::fmt::Debug for HeadlessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessHost")
            .field("styles", &self.styles.lock().len())
            .field("notifications", &self.notifications.lock().len())
            .field("scripts", &self.scripts.lock().len())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
