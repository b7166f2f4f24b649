//! Job Service
//!
//! Business logic for job submission, status queries and cancellation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crucible_core::domain::job::{
    BuildJob, BuildJobRecord, BuildStatus, FinishedBuildJob, JobTimingInfo, PRIORITY_NORMAL,
};
use crucible_core::dto::job::SubmitJobRequest;
use crucible_core::dto::stats::StatisticsFilter;

use crate::store::{QueueStore, StoreError};

/// Service error type
#[derive(Debug)]
pub enum JobError {
    NotFound(String),
    Duplicate(String),
    InvalidState(String),
    ValidationError(String),
    StoreError(StoreError),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateJob(id) => JobError::Duplicate(id),
            other => JobError::StoreError(other),
        }
    }
}

/// How a cancellation request was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still pending and is now terminally `Cancelled`
    RemovedFromQueue,
    /// The job is running; the agent was signalled and will acknowledge
    SignalledToAgent,
}

/// Validate and enqueue a new build job.
///
/// Fills in the defaults the caller left open: a fresh id, normal priority,
/// and a duration estimate derived from the exercise's historical average.
pub async fn submit_job<S: QueueStore>(
    store: &S,
    req: SubmitJobRequest,
    now: DateTime<Utc>,
) -> Result<BuildJob, JobError> {
    validate_submission(&req)?;

    let id = match req.id {
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };
    let estimated_duration_secs = match req.estimated_duration_secs {
        Some(secs) => secs.max(0),
        None => estimated_duration_for_exercise(store, req.course_id, req.exercise_id).await?,
    };

    let job = BuildJob {
        id,
        name: req.name,
        participation_id: req.participation_id,
        course_id: req.course_id,
        exercise_id: req.exercise_id,
        retry_count: 0,
        priority: req.priority.unwrap_or(PRIORITY_NORMAL),
        status: None,
        build_agent: None,
        repository_info: req.repository_info,
        timing: JobTimingInfo::queued(now, estimated_duration_secs),
        build_config: req.build_config.normalized(),
    };

    store.enqueue(job.clone()).await?;

    tracing::info!(
        "Job {} submitted for exercise {} with priority {}",
        job.id,
        job.exercise_id,
        job.priority
    );

    Ok(job)
}

/// Look a job up across the pending set, the running set and the finished
/// history.
pub async fn get_job_record<S: QueueStore>(
    store: &S,
    job_id: &str,
) -> Result<BuildJobRecord, JobError> {
    if let Some(job) = store.get_job(job_id).await? {
        return Ok(BuildJobRecord::Live(job));
    }
    if let Some(record) = store.find_finished(job_id).await? {
        return Ok(BuildJobRecord::Finished(record));
    }
    Err(JobError::NotFound(job_id.to_string()))
}

/// All pending jobs in scheduling order.
pub async fn list_pending_jobs<S: QueueStore>(store: &S) -> Result<Vec<BuildJob>, JobError> {
    Ok(store.pending_jobs().await?)
}

/// All running jobs.
pub async fn list_running_jobs<S: QueueStore>(store: &S) -> Result<Vec<BuildJob>, JobError> {
    Ok(store.running_jobs().await?)
}

/// Cancel a job.
///
/// A pending job is removed synchronously and finalised as `Cancelled`. A
/// running job is only flagged; it stays in the running set until its agent
/// acknowledges with a `Cancelled` result notice.
pub async fn cancel_job<S: QueueStore>(
    store: &S,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<CancelOutcome, JobError> {
    if let Some(job) = store.remove_pending(job_id).await? {
        let record = FinishedBuildJob::from_job(&job, BuildStatus::Cancelled, now, None);
        store.append_finished(record).await?;
        tracing::info!("Pending job {} cancelled", job_id);
        return Ok(CancelOutcome::RemovedFromQueue);
    }

    if store.request_cancellation(job_id).await? {
        tracing::info!("Cancellation of running job {} requested", job_id);
        return Ok(CancelOutcome::SignalledToAgent);
    }

    if store.find_finished(job_id).await?.is_some() {
        return Err(JobError::InvalidState(format!(
            "Job {job_id} already finished"
        )));
    }
    Err(JobError::NotFound(job_id.to_string()))
}

/// Duration estimate for a new job of this exercise, from the history of
/// builds that already ran for it. 0 when there is no history yet.
async fn estimated_duration_for_exercise<S: QueueStore>(
    store: &S,
    course_id: i64,
    exercise_id: i64,
) -> Result<i64, JobError> {
    let filter = StatisticsFilter {
        course_id: Some(course_id),
        exercise_id: Some(exercise_id),
        ..Default::default()
    };
    Ok(store.statistics(&filter).await?.average_build_duration_secs)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_submission(req: &SubmitJobRequest) -> Result<(), JobError> {
    if req.name.trim().is_empty() {
        return Err(JobError::ValidationError(
            "Job name cannot be empty".to_string(),
        ));
    }
    if let Some(id) = &req.id {
        if id.trim().is_empty() || id.len() > 255 {
            return Err(JobError::ValidationError(
                "Job id must be 1-255 characters".to_string(),
            ));
        }
    }
    if req.build_config.build_script.trim().is_empty() {
        return Err(JobError::ValidationError(
            "Build script cannot be empty".to_string(),
        ));
    }
    if req.build_config.docker_image.trim().is_empty() {
        return Err(JobError::ValidationError(
            "Docker image cannot be empty".to_string(),
        ));
    }
    Ok(())
}
