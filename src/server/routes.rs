//! Axum route handlers for the agent runtime monitoring server.
//!
//! # Routes
//!
//! - `GET    /health`                      : `{"status": "ok", "version": ...}`
//! - `GET    /definitions`                 : definitions known to the privileged context
//! - `GET    /definitions/:id/capabilities`: capabilities of one definition
//! - `POST   /definitions/:id/approval`    : record `{"granted": bool}`
//! - `POST   /execute`                     : run a capability, returns `ExecutionResult`
//! - `GET    /processes?agentId=`          : live processes of the page
//! - `DELETE /processes/:id`               : stop one process
//! - `POST   /processes/stop-all`          : stop every process
//! - `POST   /agents/:id/stop`             : stop every process of an agent

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::RuntimeConfig;
use crate::definitions::DefinitionStore;
use crate::dispatcher::{ApprovalMemory, CallContext, PolicyGate};
use crate::host::PageHost;
use crate::interpreter::ExecutionResult;
use crate::process::ProcessInfo;
use crate::runtime::{PageContext, PrivilegedContext};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Stores and router of the trusted side.
    pub privileged: Arc<PrivilegedContext>,
    /// The single page this server drives.
    pub page: Arc<PageContext>,
    /// Approval decisions for privileged definitions.
    pub approvals: Arc<ApprovalMemory>,
}

impl AppState {
    /// Open a page on `host`. Must be called inside a tokio runtime.
    pub fn new(privileged: PrivilegedContext, host: Arc<dyn PageHost>) -> Self {
        let approvals = Arc::new(ApprovalMemory::new(
            privileged.config().require_approval_for_privileged,
        ));
        let page = privileged.open_page(host, approvals.clone());
        Self {
            privileged: Arc::new(privileged),
            page: Arc::new(page),
            approvals,
        }
    }

    /// Fresh privileged context with default config and a headless page.
    pub fn headless() -> Self {
        Self::new(
            PrivilegedContext::new(Arc::new(RuntimeConfig::default())),
            Arc::new(crate::host::HeadlessHost::new()),
        )
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/definitions", get(list_definitions_handler))
        .route("/definitions/:id/capabilities", get(list_capabilities_handler))
        .route("/definitions/:id/approval", post(approval_handler))
        .route("/execute", post(execute_handler))
        .route("/processes", get(list_processes_handler))
        .route("/processes/stop-all", post(stop_all_handler))
        .route("/processes/:id", delete(stop_process_handler))
        .route("/agents/:id/stop", post(stop_agent_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// GET /health: liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "agent-runtime",
        "contextId": state.page.context_id(),
        "processes": state.page.registry().len(),
    }))
}

/// GET /definitions: id, name, version and capability names of each definition.
async fn list_definitions_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let definitions = state
        .privileged
        .definitions()
        .list_definitions()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let list: Vec<Value> = definitions
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "name": d.name,
                "version": d.version,
                "kind": d.kind,
                "containsPrivilegedCode": d.contains_privileged_code,
                "capabilities": d.capability_names(),
            })
        })
        .collect();

    Ok(Json(json!({ "definitions": list, "count": list.len() })))
}

/// GET /definitions/:id/capabilities
async fn list_capabilities_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let capabilities = state
        .page
        .dispatcher()
        .list_capabilities(&id)
        .await
        .map_err(|e| api_error(status_for(e.kind()), e.to_string()))?;
    Ok(Json(json!({ "definitionId": id, "capabilities": capabilities })))
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    granted: bool,
}

/// POST /definitions/:id/approval: body `{"granted": true}`.
async fn approval_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalRequest>,
) -> impl IntoResponse {
    state.approvals.record_approval(&id, body.granted);
    Json(json!({ "definitionId": id, "granted": body.granted }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    definition_id: String,
    capability: String,
    #[serde(default)]
    params: HashMap<String, Value>,
    #[serde(default)]
    call_context: Option<CallContext>,
}

/// POST /execute: run a capability on the page.
///
/// Request: `{"definitionId": "...", "capability": "...", "params": {...}}`
/// Response: the `ExecutionResult`; the status reflects the error kind.
async fn execute_handler(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecutionResult>) {
    let call = request
        .call_context
        .unwrap_or_else(|| CallContext::from_source("http"));
    let result = state
        .page
        .execute_capability(&request.definition_id, &request.capability, request.params, &call)
        .await;

    let status = match &result.error {
        None => StatusCode::OK,
        Some(kind) => status_for(kind),
    };
    (status, Json(result))
}

fn status_for(kind: &str) -> StatusCode {
    match kind {
        "DefinitionNotFound" | "CapabilityNotFound" => StatusCode::NOT_FOUND,
        "ParameterValidationFailed" => StatusCode::BAD_REQUEST,
        "ApprovalRequired" => StatusCode::FORBIDDEN,
        "DependencyUnresolved" => StatusCode::FAILED_DEPENDENCY,
        "RpcTimeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessQuery {
    agent_id: Option<String>,
}

/// GET /processes: live processes, optionally filtered by `agentId`.
async fn list_processes_handler(
    State(state): State<AppState>,
    Query(query): Query<ProcessQuery>,
) -> Json<Vec<ProcessInfo>> {
    Json(state.page.list_processes(query.agent_id.as_deref()))
}

/// DELETE /processes/:id
async fn stop_process_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.page.stop_process(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No active process '{}'", id),
        ))
    }
}

/// POST /processes/stop-all
async fn stop_all_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "stopped": state.page.stop_all() }))
}

/// POST /agents/:id/stop
async fn stop_agent_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    Json(json!({ "agentId": id, "stopped": state.page.stop_agent(&id) }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
