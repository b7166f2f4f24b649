//! Job API Handlers
//!
//! HTTP endpoints for job submission, status queries, cancellation and
//! result reporting.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

use crucible_core::domain::job::{BuildJobRecord, JobSummary};
use crucible_core::dto::job::{ResultNotice, SubmitJobRequest, SubmitJobResponse};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::{job as job_service, result as result_service};
use crate::store::QueueStore;

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /job/submit
/// Validate and enqueue a new build job
pub async fn submit_job<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    tracing::info!("Submitting job for participation: {}", req.participation_id);

    let job = job_service::submit_job(&state.store, req, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(SubmitJobResponse { id: job.id })))
}

/// GET /job/{id}
/// Get the current state of a job, live or finished
pub async fn get_job<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    tracing::debug!("Getting job: {}", id);

    let record = job_service::get_job_record(&state.store, &id).await?;

    Ok(Json(record.summary()))
}

/// GET /job/list/pending
/// List pending jobs in scheduling order
pub async fn list_pending_jobs<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing pending jobs");

    let jobs = job_service::list_pending_jobs(&state.store).await?;
    let summaries = jobs
        .into_iter()
        .map(|job| BuildJobRecord::Live(job).summary())
        .collect();

    Ok(Json(summaries))
}

/// GET /job/list/running
/// List running jobs
pub async fn list_running_jobs<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing running jobs");

    let jobs = job_service::list_running_jobs(&state.store).await?;
    let summaries = jobs
        .into_iter()
        .map(|job| BuildJobRecord::Live(job).summary())
        .collect();

    Ok(Json(summaries))
}

/// POST /job/{id}/cancel
/// Cancel a pending or running job
pub async fn cancel_job<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling job: {}", id);

    match job_service::cancel_job(&state.store, &id, Utc::now()).await? {
        job_service::CancelOutcome::RemovedFromQueue => Ok(StatusCode::NO_CONTENT),
        // Running: flagged, resolution arrives with the agent's acknowledgement
        job_service::CancelOutcome::SignalledToAgent => Ok(StatusCode::ACCEPTED),
    }
}

// =============================================================================
// Result Reporting
// =============================================================================

/// POST /job/result
/// Route a terminal result notice from an agent
pub async fn report_result<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Json(notice): Json<ResultNotice>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Result notice for job: {}", notice.job_id);

    result_service::process_notice(&state.store, notice, state.result_retry_ceiling, Utc::now())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
