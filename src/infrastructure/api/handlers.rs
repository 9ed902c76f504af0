//! REST API handlers.
//!
//! Runs are held in an in-memory registry keyed by execution id; each
//! submission spawns a background run whose record is observed through
//! its `WorkflowHandle`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{AgentResponse, AgentSpec, WorkflowExecution};
use crate::infrastructure::agents::{build_agents, AgentFactory};
use crate::infrastructure::config::WorkflowLoader;
use crate::services::event_bus::EventBus;
use crate::services::runner::{WorkflowHandle, WorkflowRunner};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn invalid(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct ExecutionEntry {
    handle: WorkflowHandle,
    submitted_at: DateTime<Utc>,
}

/// Shared API state: the execution registry and the agent factory.
#[derive(Clone)]
pub struct ApiState {
    executions: Arc<RwLock<HashMap<Uuid, ExecutionEntry>>>,
    factory: Arc<AgentFactory>,
}

impl ApiState {
    pub fn new(factory: Arc<AgentFactory>) -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
            factory,
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SubmitResponse {
    execution_id: Uuid,
    status: &'static str,
    total_tasks: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    execution_id: Uuid,
    status: String,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl StatusResponse {
    fn from_record(record: &WorkflowExecution) -> Self {
        let failed = record.failed_tasks();
        let message = (failed > 0).then(|| format!("{failed} task(s) failed"));
        Self {
            execution_id: record.id,
            status: record.state.as_str().to_string(),
            progress: record.progress_percent(),
            current_task: record.current_task().map(str::to_string),
            message,
        }
    }
}

#[derive(Debug, Serialize)]
struct WorkflowSummary {
    execution_id: Uuid,
    name: String,
    status: String,
    progress: u8,
    total_tasks: usize,
    completed_tasks: usize,
    failed_tasks: usize,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    workflows: Vec<WorkflowSummary>,
    total: usize,
    page: usize,
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentTestRequest {
    agent: AgentSpec,
    action: String,
    #[serde(default)]
    params: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the control API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/workflows", post(submit_workflow).get(list_workflows))
        .route("/api/v1/workflows/{id}", get(get_workflow).delete(cancel_workflow))
        .route("/api/v1/workflows/{id}/status", get(workflow_status))
        .route("/api/v1/agents/test", post(test_agent))
        .with_state(state)
}

/// Bind and serve the control API until the process exits.
pub async fn serve(state: ApiState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn submit_workflow(
    State(state): State<ApiState>,
    Json(document): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = WorkflowLoader::load_from_value(document).map_err(ApiError::invalid)?;
    let agents = build_agents(&spec, &state.factory).map_err(ApiError::invalid)?;
    let bus = Arc::new(EventBus::with_defaults());
    let total_tasks = spec.tasks.len();

    let runner = WorkflowRunner::new(spec, agents, bus).map_err(ApiError::invalid)?;
    let handle = runner.handle();
    let execution_id = handle.id;

    state.executions.write().await.insert(
        execution_id,
        ExecutionEntry { handle, submitted_at: Utc::now() },
    );

    tokio::spawn(async move {
        if let Err(err) = runner.run().await {
            tracing::error!(%execution_id, error = %err, "background run failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            execution_id,
            status: "queued",
            total_tasks,
        }),
    ))
}

async fn workflow_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = snapshot(&state, id).await?;
    Ok(Json(StatusResponse::from_record(&record)))
}

async fn get_workflow(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let record = snapshot(&state, id).await?;
    Ok(Json(record))
}

async fn list_workflows(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let executions = state.executions.read().await;
    let mut summaries = Vec::with_capacity(executions.len());
    for entry in executions.values() {
        let record = entry.handle.snapshot().await;
        if let Some(filter) = &query.status {
            if record.state.as_str() != filter {
                continue;
            }
        }
        summaries.push(WorkflowSummary {
            execution_id: record.id,
            name: record.workflow_name.clone(),
            status: record.state.as_str().to_string(),
            progress: record.progress_percent(),
            total_tasks: record.total_tasks,
            completed_tasks: record.completed_tasks(),
            failed_tasks: record.failed_tasks(),
            submitted_at: entry.submitted_at,
        });
    }
    drop(executions);

    summaries.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

    let total = summaries.len();
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let workflows = summaries
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(Json(ListResponse { workflows, total, page, page_size }))
}

async fn cancel_workflow(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let executions = state.executions.read().await;
    let entry = executions
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("unknown execution {id}")))?;
    entry.handle.cancel();
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": id, "status": "cancelling" })),
    ))
}

async fn test_agent(
    State(state): State<ApiState>,
    Json(request): Json<AgentTestRequest>,
) -> Result<Json<AgentResponse>, ApiError> {
    let agent = state.factory.build(&request.agent).map_err(ApiError::invalid)?;
    let started = Instant::now();

    let outcome =
        tokio::time::timeout(request.agent.timeout(), agent.invoke_raw(&request.action, &request.params))
            .await;

    let response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => failure_response(&err.to_string(), err.code(), started),
        Err(_) => failure_response("request timed out", "transport_timeout", started),
    };
    Ok(Json(response))
}

fn failure_response(message: &str, code: &str, started: Instant) -> AgentResponse {
    AgentResponse {
        success: false,
        result: Value::Null,
        error: Some(message.to_string()),
        latency_ms: started.elapsed().as_millis() as u64,
        metadata: HashMap::from([("code".to_string(), Value::from(code))]),
    }
}

async fn snapshot(state: &ApiState, id: Uuid) -> Result<WorkflowExecution, ApiError> {
    let executions = state.executions.read().await;
    let entry = executions
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("unknown execution {id}")))?;
    Ok(entry.handle.snapshot().await)
}
