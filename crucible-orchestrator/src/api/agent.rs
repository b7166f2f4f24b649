//! Agent API Handlers
//!
//! HTTP endpoints for agent registration, heartbeats, the assigned-jobs
//! pull, and operator capacity/pause management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

use crucible_core::domain::agent::AgentInfo;
use crucible_core::dto::agent::{CapacityUpdate, FailureThresholdUpdate, RegisterAgent};
use crucible_core::dto::job::AssignedJob;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::agent as agent_service;
use crate::store::QueueStore;

// =============================================================================
// Registration & Liveness
// =============================================================================

/// POST /agent/register
/// Register an agent or refresh an existing registration
pub async fn register_agent<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Json(req): Json<RegisterAgent>,
) -> ApiResult<Json<AgentInfo>> {
    tracing::info!("Registering agent: {}", req.agent.name);

    let info = agent_service::register_agent(
        &state.store,
        req,
        state.default_pause_threshold,
        Utc::now(),
    )
    .await?;

    Ok(Json(info))
}

/// POST /agent/{name}/heartbeat
/// Refresh an agent's liveness timestamp
pub async fn heartbeat<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    agent_service::update_heartbeat(&state.store, &name, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /agent/list
/// List all registered agents
pub async fn list_agents<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<Vec<AgentInfo>>> {
    tracing::debug!("Listing agents");

    let agents = agent_service::list_agents(&state.store).await?;
    Ok(Json(agents))
}

/// GET /agent/{name}
/// Get one agent's registry entry
pub async fn get_agent<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> ApiResult<Json<AgentInfo>> {
    let info = agent_service::get_agent(&state.store, &name).await?;
    Ok(Json(info))
}

/// GET /agent/{name}/jobs
/// The agent's assigned running set, with cancellation flags. Polled by the
/// agent between heartbeats.
pub async fn assigned_jobs<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<AssignedJob>>> {
    // 404 for unknown agents instead of an empty list
    agent_service::get_agent(&state.store, &name).await?;

    let jobs = state.store.running_jobs_for_agent(&name).await?;
    let mut assigned = Vec::with_capacity(jobs.len());
    for job in jobs {
        let cancellation_requested = state.store.cancellation_requested(&job.id).await?;
        assigned.push(AssignedJob {
            job,
            cancellation_requested,
        });
    }

    Ok(Json(assigned))
}

// =============================================================================
// Operator Controls
// =============================================================================

/// PUT /agent/{name}/capacity
/// Change an agent's capacity ceiling
pub async fn set_capacity<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
    Json(update): Json<CapacityUpdate>,
) -> ApiResult<StatusCode> {
    agent_service::set_capacity(&state.store, &name, update).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /agent/{name}/failure-threshold
/// Change an agent's auto-pause threshold
pub async fn set_failure_threshold<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
    Json(update): Json<FailureThresholdUpdate>,
) -> ApiResult<StatusCode> {
    agent_service::set_failure_threshold(&state.store, &name, update).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /agent/{name}/pause
/// Pause an agent; running jobs finish normally
pub async fn pause_agent<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    agent_service::pause_agent(&state.store, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /agent/{name}/resume
/// Resume a paused or self-paused agent
pub async fn resume_agent<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    agent_service::resume_agent(&state.store, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
