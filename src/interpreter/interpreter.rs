//! The action interpreter.
//!
//! Walks an action tree in order. Control flow is evaluated here; page
//! effects go to the [`PageHost`], privileged calls to the [`RpcBridge`], and
//! long-running effects are registered with the [`ProcessRegistry`] before
//! the action returns.
//!
//! # Contract
//!
//! - Actions run strictly in order; the first error aborts the invocation.
//! - Loop iterations never run concurrently.
//! - `return` unwinds every enclosing block and becomes the result.
//! - Nothing is retried and nothing is rolled back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;

use super::action::{Action, LogLevel};
use super::context::ExecutionContext;
use super::expr::{render_template, render_value, truthy, Expr};
use super::result::ExecutionResult;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::host::{PageHost, Trigger};
use crate::process::{Cleanup, ProcessRegistry, ProcessType};
use crate::rpc::RpcBridge;

/// How a block finished.
enum Flow {
    /// Ran to the end; carries the last data-producing action's output.
    Continue(Option<Value>),
    /// Hit a `return`.
    Return(Value),
}

/// Executes action trees for one execution context.
///
/// Cheap to clone; clones share the host, registry and bridge.
#[derive(Clone)]
pub struct Interpreter {
    host: Arc<dyn PageHost>,
    registry: Arc<ProcessRegistry>,
    bridge: Option<Arc<RpcBridge>>,
    config: Arc<RuntimeConfig>,
}

impl Interpreter {
    pub fn new(
        host: Arc<dyn PageHost>,
        registry: Arc<ProcessRegistry>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            host,
            registry,
            bridge: None,
            config,
        }
    }

    /// Builder: route `callApi` actions through `bridge`.
    pub fn with_bridge(mut self, bridge: Arc<RpcBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<dyn PageHost> {
        &self.host
    }

    /// Run `actions` and fold the outcome into an [`ExecutionResult`].
    pub async fn execute(&self, actions: &[Action], ctx: &mut ExecutionContext) -> ExecutionResult {
        self.run(actions, ctx).await.into()
    }

    /// Run `actions`, returning the result data or the first error.
    pub async fn run(
        &self,
        actions: &[Action],
        ctx: &mut ExecutionContext,
    ) -> Result<Option<Value>> {
        match self.run_block(actions, ctx).await? {
            Flow::Continue(data) => Ok(data),
            Flow::Return(Value::Null) => Ok(None),
            Flow::Return(value) => Ok(Some(value)),
        }
    }

    fn run_block<'a>(
        &'a self,
        actions: &'a [Action],
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        async move {
            let mut last = None;
            for action in actions {
                match self.run_action(action, ctx).await? {
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Continue(Some(data)) => last = Some(data),
                    Flow::Continue(None) => {}
                }
            }
            Ok(Flow::Continue(last))
        }
        .boxed()
    }

    fn run_action<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        async move {
            log::trace!(
                "[{}/{}] {}",
                ctx.agent_id,
                ctx.capability_name,
                action.kind()
            );
            self.dispatch(action, ctx)
                .await
                .map_err(|e| e.in_action(action.kind()))
        }
        .boxed()
    }

    async fn dispatch(&self, action: &Action, ctx: &mut ExecutionContext) -> Result<Flow> {
        match action {
            Action::Sequence { actions } => self.run_block(actions, ctx).await,

            Action::If {
                condition,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(condition, ctx).await?) {
                    self.run_block(then, ctx).await
                } else if let Some(otherwise) = otherwise {
                    self.run_block(otherwise, ctx).await
                } else {
                    Ok(Flow::Continue(None))
                }
            }

            Action::ForEach {
                collection,
                item_name,
                index_as,
                actions,
            } => {
                let items = match self.eval(collection, ctx).await? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(RuntimeError::action(
                            "forEach",
                            format!("cannot iterate over {other}"),
                        ))
                    }
                };
                if items.len() > self.config.max_collection_items {
                    return Err(RuntimeError::action(
                        "forEach",
                        format!(
                            "collection has {} items (limit {})",
                            items.len(),
                            self.config.max_collection_items
                        ),
                    ));
                }

                let mut last = None;
                for (index, item) in items.into_iter().enumerate() {
                    let mut scope = ctx.child();
                    scope.set(item_name.clone(), item);
                    scope.set(index_as.clone(), Value::from(index));
                    match self.run_block(actions, &mut scope).await? {
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue(Some(data)) => last = Some(data),
                        Flow::Continue(None) => {}
                    }
                }
                Ok(Flow::Continue(last))
            }

            Action::While {
                condition,
                actions,
                max_iterations,
            } => {
                let ceiling = self.config.max_while_iterations;
                let limit = max_iterations.map_or(ceiling, |m| m.min(ceiling));
                let mut iterations = 0u32;
                let mut last = None;
                while truthy(&self.eval(condition, ctx).await?) {
                    if iterations >= limit {
                        return Err(RuntimeError::action(
                            "while",
                            format!("loop exceeded {limit} iterations"),
                        ));
                    }
                    iterations += 1;
                    match self.run_block(actions, ctx).await? {
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Continue(Some(data)) => last = Some(data),
                        Flow::Continue(None) => {}
                    }
                }
                Ok(Flow::Continue(last))
            }

            Action::AddStyle { css, id } => {
                let css = render_template(css, ctx);
                self.host.add_style(id.as_deref(), &css).await?;
                Ok(Flow::Continue(None))
            }

            Action::Notify { title, message } => {
                let title = render_template(title, ctx);
                let message = render_template(message, ctx);
                self.host.notify(&title, &message).await?;
                Ok(Flow::Continue(None))
            }

            Action::ExecuteScript { code } => {
                let value = self.host.execute_script(code).await?;
                Ok(Flow::Continue((!value.is_null()).then_some(value)))
            }

            Action::StartProcess {
                process_type,
                actions,
                options,
            } => {
                let id = self.start_process(*process_type, actions, options, ctx)?;
                Ok(Flow::Continue(Some(Value::String(id))))
            }

            Action::RegisterCleanup { actions, cleanup } => {
                let flow = self.run_block(actions, ctx).await?;
                let id = self.register_cleanup(cleanup, ctx);
                Ok(match flow {
                    Flow::Return(value) => Flow::Return(value),
                    Flow::Continue(_) => Flow::Continue(Some(Value::String(id))),
                })
            }

            Action::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval(expr, ctx).await?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }

            Action::CallApi {
                method,
                params,
                store_as,
            } => {
                let bridge = self.bridge.as_ref().ok_or_else(|| {
                    RuntimeError::Transport("no RPC bridge attached to this context".into())
                })?;
                let params = match render_value(params, ctx) {
                    Value::Null => Value::Object(Default::default()),
                    other => other,
                };
                let result = bridge.call(method, params).await?;
                if let Some(name) = store_as {
                    ctx.set(name.clone(), result.clone());
                }
                Ok(Flow::Continue(Some(result)))
            }

            Action::SetVariable { name, value } => {
                let value = self.eval(value, ctx).await?;
                ctx.set(name.clone(), value);
                Ok(Flow::Continue(None))
            }

            Action::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(Flow::Continue(None))
            }

            Action::Log { message, level } => {
                let message = render_template(message, ctx);
                let (agent, capability) = (&ctx.agent_id, &ctx.capability_name);
                match level {
                    LogLevel::Debug => log::debug!("[{}/{}] {}", agent, capability, message),
                    LogLevel::Info => log::info!("[{}/{}] {}", agent, capability, message),
                    LogLevel::Warn => log::warn!("[{}/{}] {}", agent, capability, message),
                    LogLevel::Error => log::error!("[{}/{}] {}", agent, capability, message),
                }
                Ok(Flow::Continue(None))
            }
        }
    }

    async fn eval(&self, expr: &Expr, ctx: &ExecutionContext) -> Result<Value> {
        expr.evaluate(ctx, self.host.as_ref(), self.config.max_collection_items)
            .await
    }

    /// Start one long-running effect and register exactly one handle for it.
    ///
    /// `interval` and `timeout` are tokio tasks; every other type is a host
    /// subscription. Nothing is registered if starting fails.
    fn start_process(
        &self,
        process_type: ProcessType,
        actions: &[Action],
        options: &Value,
        ctx: &ExecutionContext,
    ) -> Result<String> {
        let options = render_value(options, ctx);
        let metadata: HashMap<String, Value> = match &options {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Value::Null => HashMap::new(),
            other => {
                return Err(RuntimeError::action(
                    "startProcess",
                    format!("options must be an object, got {other}"),
                ))
            }
        };

        let runner = ProcessRunner {
            interpreter: self.clone(),
            actions: Arc::new(actions.to_vec()),
            base: ctx.child(),
            process_id: Arc::new(OnceCell::new()),
        };
        let process_id = Arc::clone(&runner.process_id);
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let cleanup: Cleanup = match process_type {
            ProcessType::Interval => {
                let period = millis_option(&options, "intervalMs")?
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| {
                        RuntimeError::action(
                            "startProcess",
                            "interval processes need a positive options.intervalMs",
                        )
                    })?;
                let (stop_tx, mut stop_rx) = watch::channel(false);
                tokio::spawn(async move {
                    if ready_rx.await.is_err() {
                        return;
                    }
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = stop_rx.changed() => break,
                        }
                        // A run in progress finishes even if a stop lands meanwhile.
                        runner.run(Value::Null).await;
                    }
                });
                signal_on_cleanup(stop_tx)
            }
            ProcessType::Timeout => {
                let delay = millis_option(&options, "delayMs")?.unwrap_or_default();
                let registry = Arc::clone(&self.registry);
                let (stop_tx, mut stop_rx) = watch::channel(false);
                tokio::spawn(async move {
                    if ready_rx.await.is_err() {
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop_rx.changed() => return,
                    }
                    runner.run(Value::Null).await;
                    if let Some(id) = runner.process_id.get() {
                        registry.stop(id);
                    }
                });
                signal_on_cleanup(stop_tx)
            }
            other => {
                let runtime = tokio::runtime::Handle::current();
                let trigger: Trigger = Arc::new(move |event: Value| {
                    let runner = runner.clone();
                    runtime.spawn(async move { runner.run(event).await });
                });
                self.host.subscribe(other, &options, trigger)?
            }
        };

        let id = self.registry.register(
            &ctx.agent_id,
            &ctx.capability_name,
            process_type,
            cleanup,
            metadata,
        );
        let _ = process_id.set(id.clone());
        let _ = ready_tx.send(());
        Ok(id)
    }

    /// Register a `custom` process whose cleanup runs `cleanup` actions.
    fn register_cleanup(&self, cleanup: &[Action], ctx: &ExecutionContext) -> String {
        let interpreter = self.clone();
        let actions = cleanup.to_vec();
        let scope = ctx.child();
        let runtime = tokio::runtime::Handle::current();

        let on_stop: Cleanup = Box::new(move || {
            runtime.spawn(async move {
                let mut scope = scope;
                if let Err(e) = interpreter.run(&actions, &mut scope).await {
                    log::warn!(
                        "Cleanup actions of {}/{} failed: {}",
                        scope.agent_id,
                        scope.capability_name,
                        e
                    );
                }
            });
            Ok(())
        });

        self.registry.register(
            &ctx.agent_id,
            &ctx.capability_name,
            ProcessType::Custom,
            on_stop,
            HashMap::new(),
        )
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("registry", &self.registry)
            .field("bridge", &self.bridge.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Runs a process's child actions each time the process fires.
#[derive(Clone)]
struct ProcessRunner {
    interpreter: Interpreter,
    actions: Arc<Vec<Action>>,
    base: ExecutionContext,
    process_id: Arc<OnceCell<String>>,
}

impl ProcessRunner {
    /// One triggered run. Errors are logged; the capability has already returned.
    async fn run(&self, event: Value) {
        let mut scope = self.base.child();
        scope.set("event", event);
        if let Some(id) = self.process_id.get() {
            scope.set("process", serde_json::json!({ "id": id }));
        }
        if let Err(e) = self.interpreter.run(&self.actions, &mut scope).await {
            log::warn!(
                "Process {} of {}/{} failed: {}",
                self.process_id.get().map(String::as_str).unwrap_or("<starting>"),
                scope.agent_id,
                scope.capability_name,
                e
            );
        }
    }
}

/// Cleanup for timer processes: stops future firings, never the current run.
fn signal_on_cleanup(stop: watch::Sender<bool>) -> Cleanup {
    Box::new(move || {
        stop.send_replace(true);
        Ok(())
    })
}

fn millis_option(options: &Value, key: &str) -> Result<Option<Duration>> {
    match options.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(|ms| Some(Duration::from_millis(ms))).ok_or_else(|| {
            RuntimeError::action(
                "startProcess",
                format!("options.{key} must be a non-negative integer, got {v}"),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use crate::rpc::{builtin_router, connect_in_process, InMemoryKeyValueStore, KeyValueStore};
    use serde_json::json;

    struct Harness {
        host: Arc<HeadlessHost>,
        registry: Arc<ProcessRegistry>,
        interpreter: Interpreter,
    }

    fn harness_with(config: RuntimeConfig) -> Harness {
        let host = Arc::new(HeadlessHost::new());
        let registry = Arc::new(ProcessRegistry::new());
        let interpreter = Interpreter::new(host.clone(), registry.clone(), Arc::new(config));
        Harness {
            host,
            registry,
            interpreter,
        }
    }

    fn harness() -> Harness {
        harness_with(RuntimeConfig::default())
    }

    fn actions(value: Value) -> Vec<Action> {
        serde_json::from_value(value).unwrap()
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("agent", "cap")
    }

    fn messages(host: &HeadlessHost) -> Vec<String> {
        host.notifications().into_iter().map(|n| n.message).collect()
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        let h = harness();
        h.host.fail_scripts_containing("throw");
        let tree = actions(json!([
            {"type": "notify", "title": "t", "message": "first"},
            {"type": "sequence", "actions": [
                {"type": "executeScript", "code": "throw new Error()"},
            ]},
            {"type": "notify", "title": "t", "message": "never"},
        ]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("ActionExecutionFailed"));
        assert!(result.detail.unwrap().contains("executeScript"));
        assert_eq!(messages(&h.host), vec!["first"]);
        assert_eq!(h.host.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_for_each_failure_keeps_earlier_iterations() {
        let h = harness();
        h.host.fail_scripts_containing("boom");
        let tree = actions(json!([{
            "type": "forEach",
            "collection": {"literal": [1, 2, 3, 4]},
            "actions": [
                {"type": "notify", "title": "t", "message": "{{index}}:{{item}}"},
                {"type": "if", "condition": {"eq": [{"var": "item"}, {"literal": 3}]},
                 "then": [{"type": "executeScript", "code": "boom"}]},
            ],
        }]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(!result.success);
        assert_eq!(messages(&h.host), vec!["0:1", "1:2", "2:3"]);
    }

    #[tokio::test]
    async fn test_for_each_over_query() {
        let h = harness();
        h.host.set_elements(".overlay", vec![json!({"id": "a"}), json!({"id": "b"})]);
        let tree = actions(json!([{
            "type": "forEach",
            "collection": {"query": ".overlay"},
            "as": "el",
            "actions": [{"type": "addStyle", "css": "#{{el.id}} { display: none; }"}],
        }]));

        assert!(h.interpreter.execute(&tree, &mut ctx()).await.success);
        assert_eq!(h.host.styles(), vec!["#a { display: none; }", "#b { display: none; }"]);
    }

    #[tokio::test]
    async fn test_for_each_rejects_oversized_collection() {
        let h = harness_with(RuntimeConfig {
            max_collection_items: 2,
            ..RuntimeConfig::default()
        });
        let tree = actions(json!([{
            "type": "forEach",
            "collection": {"literal": [1, 2, 3]},
            "actions": [{"type": "notify", "title": "t", "message": "x"}],
        }]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(!result.success);
        assert!(h.host.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_if_else_branches() {
        let h = harness();
        let tree = actions(json!([{
            "type": "if",
            "condition": {"exists": "params.selector"},
            "then": [{"type": "notify", "title": "t", "message": "has {{params.selector}}"}],
            "else": [{"type": "notify", "title": "t", "message": "none"}],
        }]));

        let mut with = ctx().with_binding("params", json!({"selector": ".ad"}));
        h.interpreter.execute(&tree, &mut with).await;
        h.interpreter.execute(&tree, &mut ctx()).await;
        assert_eq!(messages(&h.host), vec!["has .ad", "none"]);
    }

    #[tokio::test]
    async fn test_while_runs_until_condition_clears() {
        let h = harness();
        let tree = actions(json!([
            {"type": "setVariable", "name": "again", "value": {"literal": true}},
            {"type": "while", "condition": {"var": "again"}, "actions": [
                {"type": "notify", "title": "t", "message": "once"},
                {"type": "setVariable", "name": "again", "value": {"literal": false}},
            ]},
        ]));

        assert!(h.interpreter.execute(&tree, &mut ctx()).await.success);
        assert_eq!(messages(&h.host), vec!["once"]);
    }

    #[tokio::test]
    async fn test_while_cap_fails_the_action() {
        let h = harness_with(RuntimeConfig {
            max_while_iterations: 5,
            ..RuntimeConfig::default()
        });
        let tree = actions(json!([{
            "type": "while",
            "condition": {"literal": true},
            "actions": [{"type": "notify", "title": "t", "message": "spin"}],
        }]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(!result.success);
        assert!(result.detail.unwrap().contains("exceeded 5"));
        assert_eq!(h.host.notifications().len(), 5);

        // A per-action limit can only lower the ceiling.
        let tree = actions(json!([{
            "type": "while",
            "condition": {"literal": true},
            "maxIterations": 100,
            "actions": [],
        }]));
        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(result.detail.unwrap().contains("exceeded 5"));
    }

    #[tokio::test]
    async fn test_return_unwinds_enclosing_blocks() {
        let h = harness();
        let tree = actions(json!([
            {"type": "notify", "title": "t", "message": "before"},
            {"type": "forEach", "collection": {"literal": [1, 2]}, "actions": [
                {"type": "if", "condition": {"literal": true},
                 "then": [{"type": "return", "value": {"template": "done at {{item}}"}}]},
            ]},
            {"type": "notify", "title": "t", "message": "after"},
        ]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(result.success);
        assert_eq!(result.data, Some(json!("done at 1")));
        assert_eq!(messages(&h.host), vec!["before"]);
    }

    #[tokio::test]
    async fn test_loop_bindings_do_not_leak() {
        let h = harness();
        let tree = actions(json!([
            {"type": "forEach", "collection": {"literal": [1]}, "actions": [
                {"type": "setVariable", "name": "inner", "value": {"literal": "x"}},
            ]},
            {"type": "return", "value": {"exists": "inner"}},
        ]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert_eq!(result.data, Some(json!(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_process_stops_with_its_capability() {
        let h = harness();
        let tree = actions(json!([{
            "type": "startProcess",
            "processType": "interval",
            "options": {"intervalMs": 100},
            "actions": [{"type": "notify", "title": "t", "message": "tick {{process.id}}"}],
        }]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(result.success);
        let id = result.data.unwrap().as_str().unwrap().to_string();
        assert!(h.registry.is_active(&id));
        assert_eq!(h.registry.list(Some("agent"))[0].metadata["intervalMs"], json!(100));

        tokio::time::sleep(Duration::from_millis(350)).await;
        let ticks = h.host.notifications().len();
        assert!(ticks >= 2);
        assert_eq!(messages(&h.host)[0], format!("tick {id}"));

        assert_eq!(h.registry.stop_capability("agent", "cap"), 1);
        assert_eq!(h.registry.stop_capability("agent", "cap"), 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.host.notifications().len(), ticks);
    }

    #[tokio::test]
    async fn test_interval_without_period_registers_nothing() {
        let h = harness();
        let tree = actions(json!([{
            "type": "startProcess",
            "processType": "interval",
            "actions": [],
        }]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(!result.success);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_process_deregisters_after_firing() {
        let h = harness();
        let tree = actions(json!([{
            "type": "startProcess",
            "processType": "timeout",
            "options": {"delayMs": 50},
            "actions": [{"type": "notify", "title": "t", "message": "fired"}],
        }]));

        assert!(h.interpreter.execute(&tree, &mut ctx()).await.success);
        assert_eq!(h.registry.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(messages(&h.host), vec!["fired"]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_running_timer_body_finish() {
        let h = harness();
        let tree = actions(json!([{
            "type": "startProcess",
            "processType": "timeout",
            "options": {"delayMs": 10},
            "actions": [
                {"type": "notify", "title": "t", "message": "start"},
                {"type": "wait", "ms": 100},
                {"type": "notify", "title": "t", "message": "end"},
            ],
        }]));

        assert!(h.interpreter.execute(&tree, &mut ctx()).await.success);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(messages(&h.host), vec!["start"]);

        assert_eq!(h.registry.stop_all(), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(messages(&h.host), vec!["start", "end"]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_stopped_mid_run_does_not_fire_again() {
        let h = harness();
        let tree = actions(json!([{
            "type": "startProcess",
            "processType": "interval",
            "options": {"intervalMs": 100},
            "actions": [
                {"type": "wait", "ms": 50},
                {"type": "notify", "title": "t", "message": "tick"},
            ],
        }]));

        assert!(h.interpreter.execute(&tree, &mut ctx()).await.success);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(h.registry.stop_all(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(messages(&h.host), vec!["tick"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_listener_runs_on_host_events() {
        let h = harness();
        let tree = actions(json!([{
            "type": "startProcess",
            "processType": "eventListener",
            "options": {"event": "click", "selector": "{{params.selector}}"},
            "actions": [{"type": "notify", "title": "t", "message": "clicked {{event.target}}"}],
        }]));
        let mut ctx = ctx().with_binding("params", json!({"selector": "#buy"}));

        let result = h.interpreter.execute(&tree, &mut ctx).await;
        assert!(result.success);
        assert_eq!(
            h.host.subscription_options(ProcessType::EventListener),
            vec![json!({"event": "click", "selector": "#buy"})]
        );

        assert_eq!(h.host.fire(ProcessType::EventListener, json!({"target": "buy"})), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(messages(&h.host), vec!["clicked buy"]);

        assert_eq!(h.registry.stop_agent("agent"), 1);
        assert_eq!(h.host.subscription_count(), 0);
        assert_eq!(h.host.fire(ProcessType::EventListener, json!({})), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_cleanup_runs_on_stop() {
        let h = harness();
        let tree = actions(json!([{
            "type": "registerCleanup",
            "actions": [{"type": "addStyle", "id": "dark", "css": "body { background: #000; }"}],
            "cleanup": [{"type": "notify", "title": "t", "message": "restored"}],
        }]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        let id = result.data.unwrap().as_str().unwrap().to_string();
        assert_eq!(h.host.styles().len(), 1);
        assert!(h.host.notifications().is_empty());
        assert_eq!(h.registry.count_by_type().get(&ProcessType::Custom), Some(&1));

        assert!(h.registry.stop(&id));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(messages(&h.host), vec!["restored"]);
        assert!(!h.registry.stop(&id));
    }

    #[tokio::test]
    async fn test_call_api_goes_through_bridge() {
        let storage = Arc::new(InMemoryKeyValueStore::new());
        storage
            .set(json!({"theme": "dark"}).as_object().unwrap().clone())
            .await
            .unwrap();
        let router = builtin_router(
            storage,
            Arc::new(crate::definitions::InMemoryDefinitionStore::new()),
            Arc::new(crate::definitions::InMemoryCredentialStore::new()),
        );
        let config = RuntimeConfig::default();
        let (bridge, _serve) = connect_in_process(Arc::new(router), &config);

        let h = harness();
        let interpreter = h.interpreter.clone().with_bridge(Arc::new(bridge));
        let tree = actions(json!([
            {"type": "callApi", "method": "storage.get",
             "params": {"keys": "{{params.key}}"}, "storeAs": "stored"},
            {"type": "return", "value": {"var": "stored.theme"}},
        ]));
        let mut ctx = ctx().with_binding("params", json!({"key": "theme"}));

        let result = interpreter.execute(&tree, &mut ctx).await;
        assert_eq!(result, ExecutionResult::ok(Some(json!("dark"))));
    }

    #[tokio::test]
    async fn test_call_api_without_bridge_fails() {
        let h = harness();
        let tree = actions(json!([{"type": "callApi", "method": "storage.get"}]));

        let result = h.interpreter.execute(&tree, &mut ctx()).await;
        assert!(!result.success);
        assert!(result.detail.unwrap().contains("no RPC bridge"));
    }
}
