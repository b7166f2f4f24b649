//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain. The router is
//! generic over the queue store so the same surface serves the Postgres
//! store in production and the in-memory store in tests.

pub mod agent;
pub mod error;
pub mod health;
pub mod job;
pub mod stats;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::store::QueueStore;

/// Shared handler state: the store plus the policy knobs handlers need.
#[derive(Clone)]
pub struct AppState<S> {
    pub store: S,
    /// Infra-failure retries before a job turns into terminal `Error`
    pub result_retry_ceiling: u32,
    /// Auto-pause threshold for agents that do not bring their own
    pub default_pause_threshold: u32,
}

/// Create the main API router with all endpoints
pub fn create_router<S: QueueStore + Clone>(state: AppState<S>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/job/submit", post(job::submit_job))
        .route("/job/list/pending", get(job::list_pending_jobs))
        .route("/job/list/running", get(job::list_running_jobs))
        .route("/job/result", post(job::report_result))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/cancel", post(job::cancel_job))
        // Agent endpoints
        .route("/agent/register", post(agent::register_agent))
        .route("/agent/list", get(agent::list_agents))
        .route("/agent/{name}", get(agent::get_agent))
        .route("/agent/{name}/heartbeat", post(agent::heartbeat))
        .route("/agent/{name}/jobs", get(agent::assigned_jobs))
        .route("/agent/{name}/capacity", put(agent::set_capacity))
        .route(
            "/agent/{name}/failure-threshold",
            put(agent::set_failure_threshold),
        )
        .route("/agent/{name}/pause", post(agent::pause_agent))
        .route("/agent/{name}/resume", post(agent::resume_agent))
        // Statistics
        .route("/statistics", get(stats::queue_statistics))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
