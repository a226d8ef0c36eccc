//! agent-runtime HTTP server binary.
//!
//! Starts an axum HTTP server around one headless page context, so agent
//! definitions can be exercised and their processes monitored over HTTP.
//!
//! # Environment Variables
//!
//! - `AGENT_RUNTIME_CONFIG`: YAML config file (optional)
//! - `AGENT_RUNTIME_*`: per-field overrides, e.g. `AGENT_RUNTIME_BIND_ADDR`
//! - `RUST_LOG`: tracing filter (default: "info,agent_runtime=debug")
//!
//! # Usage
//!
//! ```bash
//! AGENT_RUNTIME_DEFINITIONS_DIR=definitions cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;
use agent_runtime::host::HeadlessHost;
use agent_runtime::runtime::PrivilegedContext;
use agent_runtime::server::{app_router, AppState};
use agent_runtime::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,agent_runtime=debug".into()),
        )
        .init();

    let config = match std::env::var("AGENT_RUNTIME_CONFIG") {
        Ok(path) => RuntimeConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => RuntimeConfig::default(),
    }
    .with_env_overrides(|key| std::env::var(key).ok())
    .context("applying AGENT_RUNTIME_* overrides")?;

    let privileged = PrivilegedContext::new(Arc::new(config.clone()));
    if let Some(dir) = &config.definitions_dir {
        let loaded = privileged
            .definitions()
            .load_directory(dir)
            .with_context(|| format!("loading definitions from {}", dir.display()))?;
        tracing::info!("Loaded {} definitions from {}", loaded, dir.display());
    } else {
        tracing::warn!("No definitions_dir configured; starting with an empty store");
    }

    let state = AppState::new(privileged, Arc::new(HeadlessHost::new()));
    tracing::info!("Page context {} ready", state.page.context_id());

    let app = app_router(state);

    tracing::info!("agent-runtime server starting on {}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health");
    tracing::info!("  GET    /definitions");
    tracing::info!("  POST   /execute");
    tracing::info!("  GET    /processes");
    tracing::info!("  DELETE /processes/:id");
    tracing::info!("  POST   /processes/stop-all");
    tracing::info!("  POST   /agents/:id/stop");

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
