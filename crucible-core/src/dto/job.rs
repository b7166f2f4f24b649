//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::build::{BuildConfig, BuildResult, RepositoryInfo};

/// Request to submit a new build job.
///
/// Callers that want idempotent retries supply their own `id`; duplicates are
/// rejected, never silently merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    /// Caller-supplied id; generated at submission when absent
    pub id: Option<String>,

    /// Human-readable job name
    pub name: String,

    pub participation_id: i64,
    pub course_id: i64,
    pub exercise_id: i64,

    /// Lower sorts first; defaults to the normal priority when absent
    pub priority: Option<i32>,

    /// Advisory duration estimate in seconds; derived from the exercise's
    /// historical average when absent
    pub estimated_duration_secs: Option<i64>,

    pub repository_info: RepositoryInfo,
    pub build_config: BuildConfig,
}

/// Response to a job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub id: String,
}

/// Terminal outcome of one execution attempt, as observed by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultOutcome {
    /// The build ran to completion (successfully or not)
    Finished(BuildResult),

    /// The executor itself broke: container failed to start, agent crashed,
    /// network dropped. The job is eligible for a re-queue.
    InfraFailure { reason: String },

    /// The agent acknowledged a cancellation request
    Cancelled,

    /// The build exceeded its configured timeout
    TimedOut,
}

/// Completion/failure/cancellation signal from an agent to the result router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNotice {
    pub job_id: String,
    pub outcome: ResultOutcome,
}

/// One entry of an agent's assigned-jobs poll: the running job plus the
/// cooperative cancellation flag the agent is expected to honor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedJob {
    pub job: crate::domain::job::BuildJob,
    pub cancellation_requested: bool,
}
