//! Build job domain types
//!
//! A [`BuildJob`] is one queued or running build request. Once it reaches a
//! terminal status it is projected into a durable [`FinishedBuildJob`] and
//! leaves the live queue. [`BuildJobRecord`] is the sum of both shapes with a
//! shared read-only [`JobSummary`] projection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentRef;
use crate::domain::build::{BuildConfig, BuildResult, RepositoryInfo};

/// Highest scheduling priority (lower sorts first).
pub const PRIORITY_HIGH: i32 = 1;
/// Default priority for regular submissions.
pub const PRIORITY_NORMAL: i32 = 3;
/// Lowest priority, e.g. for bulk re-runs.
pub const PRIORITY_LOW: i32 = 5;

/// Terminal status of a build job.
///
/// A job carries no status while it is pending or running; the set holding it
/// tells its lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Successful,
    Failed,
    Cancelled,
    /// The job never ran: dispatch or infrastructure retries were exhausted
    Error,
    Timeout,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Successful => write!(f, "SUCCESSFUL"),
            BuildStatus::Failed => write!(f, "FAILED"),
            BuildStatus::Cancelled => write!(f, "CANCELLED"),
            BuildStatus::Error => write!(f, "ERROR"),
            BuildStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Timestamps of one job's passage through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobTimingInfo {
    /// Set once, at enqueue
    pub submission_date: DateTime<Utc>,
    /// Set when dispatched to an agent
    pub build_start_date: Option<DateTime<Utc>>,
    /// Set on the terminal state
    pub build_completion_date: Option<DateTime<Utc>>,
    /// Recomputed on dispatch from the estimated duration
    pub estimated_completion_date: Option<DateTime<Utc>>,
    /// Advisory, from historical averages
    pub estimated_duration_secs: i64,
}

impl JobTimingInfo {
    /// Timing of a freshly submitted job.
    pub fn queued(submission_date: DateTime<Utc>, estimated_duration_secs: i64) -> Self {
        Self {
            submission_date,
            build_start_date: None,
            build_completion_date: None,
            estimated_completion_date: None,
            estimated_duration_secs,
        }
    }

    /// Checks `submission <= start <= completion` for the dates that are set.
    pub fn is_consistent(&self) -> bool {
        if let Some(start) = self.build_start_date {
            if start < self.submission_date {
                return false;
            }
            if let Some(completion) = self.build_completion_date {
                if completion < start {
                    return false;
                }
            }
        }
        true
    }
}

/// One queued or running build request.
///
/// The identity fields are fixed at submission. State changes go through the
/// with-field update functions ([`BuildJob::started_on`],
/// [`BuildJob::requeued`]) instead of in-place mutation, so a dispatched job's
/// identity can never be altered by accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJob {
    /// Globally unique, caller-supplied or generated at submission
    pub id: String,
    pub name: String,
    pub participation_id: i64,
    pub course_id: i64,
    pub exercise_id: i64,
    /// Times this job was pushed back into the queue after an infra fault
    pub retry_count: u32,
    /// Lower sorts first
    pub priority: i32,
    /// None while pending or running
    pub status: Option<BuildStatus>,
    /// The agent this job is assigned to; None while pending
    pub build_agent: Option<AgentRef>,
    pub repository_info: RepositoryInfo,
    pub timing: JobTimingInfo,
    pub build_config: BuildConfig,
}

impl BuildJob {
    /// Total scheduling order: `(priority, submission_date, id)`.
    ///
    /// The job id is the deterministic tie-break for jobs submitted with
    /// identical priority at the same instant.
    pub fn ordering_key(&self) -> (i32, DateTime<Utc>, &str) {
        (self.priority, self.timing.submission_date, &self.id)
    }

    /// The job as assigned to `agent` at `now`: start date stamped, estimated
    /// completion recomputed, everything else unchanged.
    pub fn started_on(&self, agent: AgentRef, now: DateTime<Utc>) -> BuildJob {
        let estimated = self.timing.estimated_duration_secs.max(0);
        let mut job = self.clone();
        job.build_agent = Some(agent);
        job.timing.build_start_date = Some(now);
        job.timing.estimated_completion_date = Some(now + Duration::seconds(estimated));
        job
    }

    /// The job as pushed back into the pending set after an infra fault:
    /// retry count incremented, agent and start date cleared.
    ///
    /// The submission date is preserved so FIFO fairness among same-priority
    /// jobs survives a retry.
    pub fn requeued(&self) -> BuildJob {
        let mut job = self.clone();
        job.retry_count += 1;
        job.build_agent = None;
        job.status = None;
        job.timing.build_start_date = None;
        job.timing.estimated_completion_date = None;
        job
    }
}

/// Durable, append-only projection of a terminal job.
///
/// Written once by the result router and never mutated; feeds statistics and
/// audit independently of the live queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedBuildJob {
    pub id: String,
    pub name: String,
    pub participation_id: i64,
    pub course_id: i64,
    pub exercise_id: i64,
    pub retry_count: u32,
    pub priority: i32,
    pub status: BuildStatus,
    /// Address of the agent that ran (or last held) the job; empty if it never ran
    pub build_agent_address: String,
    pub commit_hash: Option<String>,
    pub timing: JobTimingInfo,
    pub result: Option<BuildResult>,
}

impl FinishedBuildJob {
    /// Projects a live job into its finished form.
    pub fn from_job(
        job: &BuildJob,
        status: BuildStatus,
        completed_at: DateTime<Utc>,
        result: Option<BuildResult>,
    ) -> Self {
        let mut timing = job.timing;
        timing.build_completion_date = Some(completed_at);
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            participation_id: job.participation_id,
            course_id: job.course_id,
            exercise_id: job.exercise_id,
            retry_count: job.retry_count,
            priority: job.priority,
            status,
            build_agent_address: job
                .build_agent
                .as_ref()
                .map(|agent| agent.member_address.clone())
                .unwrap_or_default(),
            commit_hash: job.build_config.commit_hash_to_build.clone(),
            timing,
            result,
        }
    }
}

/// Lifecycle state exposed to status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Finished(BuildStatus),
}

/// A job in either its live or its finished shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuildJobRecord {
    Live(BuildJob),
    Finished(FinishedBuildJob),
}

impl BuildJobRecord {
    /// Shared read-only projection over both shapes.
    pub fn summary(&self) -> JobSummary {
        match self {
            BuildJobRecord::Live(job) => JobSummary {
                id: job.id.clone(),
                name: job.name.clone(),
                participation_id: job.participation_id,
                course_id: job.course_id,
                exercise_id: job.exercise_id,
                priority: job.priority,
                retry_count: job.retry_count,
                state: if job.build_agent.is_some() {
                    JobState::Running
                } else {
                    JobState::Pending
                },
                build_agent: job.build_agent.as_ref().map(|agent| agent.name.clone()),
                submission_date: job.timing.submission_date,
                build_start_date: job.timing.build_start_date,
                build_completion_date: None,
            },
            BuildJobRecord::Finished(job) => JobSummary {
                id: job.id.clone(),
                name: job.name.clone(),
                participation_id: job.participation_id,
                course_id: job.course_id,
                exercise_id: job.exercise_id,
                priority: job.priority,
                retry_count: job.retry_count,
                state: JobState::Finished(job.status),
                build_agent: (!job.build_agent_address.is_empty())
                    .then(|| job.build_agent_address.clone()),
                submission_date: job.timing.submission_date,
                build_start_date: job.timing.build_start_date,
                build_completion_date: job.timing.build_completion_date,
            },
        }
    }
}

/// Read-only view shared by live and finished jobs, for listings and status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub name: String,
    pub participation_id: i64,
    pub course_id: i64,
    pub exercise_id: i64,
    pub priority: i32,
    pub retry_count: u32,
    pub state: JobState,
    pub build_agent: Option<String>,
    pub submission_date: DateTime<Utc>,
    pub build_start_date: Option<DateTime<Utc>>,
    pub build_completion_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::build::RepositoryType;

    fn job(id: &str, priority: i32, submission_date: DateTime<Utc>) -> BuildJob {
        BuildJob {
            id: id.to_string(),
            name: format!("job-{id}"),
            participation_id: 7,
            course_id: 1,
            exercise_id: 2,
            retry_count: 0,
            priority,
            status: None,
            build_agent: None,
            repository_info: RepositoryInfo {
                repository_name: "exercise-student1".to_string(),
                repository_type: RepositoryType::User,
                triggered_by_push_to: RepositoryType::User,
                assignment_repository_uri: "http://git/assignment.git".to_string(),
                test_repository_uri: "http://git/tests.git".to_string(),
                solution_repository_uri: None,
                auxiliary_repository_uris: vec![],
                auxiliary_checkout_directories: vec![],
            },
            timing: JobTimingInfo::queued(submission_date, 30),
            build_config: BuildConfig {
                build_script: "./run.sh".to_string(),
                docker_image: "eclipse-temurin:21".to_string(),
                commit_hash_to_build: Some("abc123".to_string()),
                assignment_commit_hash: Some("abc123".to_string()),
                test_commit_hash: None,
                branch: "main".to_string(),
                programming_language: Some("java".to_string()),
                project_type: None,
                timeout_seconds: 120,
                assignment_checkout_path: None,
                test_checkout_path: None,
                solution_checkout_path: None,
                result_paths: vec![],
                docker_flags: vec![],
            },
        }
    }

    fn agent() -> AgentRef {
        AgentRef {
            name: "agent-1".to_string(),
            member_address: "10.0.0.5:7921".to_string(),
            display_name: "Agent 1".to_string(),
        }
    }

    #[test]
    fn test_ordering_prefers_lower_priority_then_older_submission() {
        let now = Utc::now();
        let a = job("a", PRIORITY_NORMAL, now);
        let b = job("b", PRIORITY_HIGH, now + Duration::seconds(10));
        let c = job("c", PRIORITY_HIGH, now);

        let mut jobs = [&a, &b, &c];
        jobs.sort_by(|x, y| x.ordering_key().cmp(&y.ordering_key()));
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ordering_ties_break_on_id() {
        let now = Utc::now();
        let x = job("x", PRIORITY_NORMAL, now);
        let y = job("y", PRIORITY_NORMAL, now);
        assert!(x.ordering_key() < y.ordering_key());
    }

    #[test]
    fn test_started_on_stamps_start_and_estimate() {
        let now = Utc::now();
        let started = job("a", PRIORITY_NORMAL, now).started_on(agent(), now);

        assert_eq!(started.build_agent.as_ref().unwrap().name, "agent-1");
        assert_eq!(started.timing.build_start_date, Some(now));
        assert_eq!(
            started.timing.estimated_completion_date,
            Some(now + Duration::seconds(30))
        );
        assert!(started.timing.is_consistent());
    }

    #[test]
    fn test_requeued_preserves_submission_date() {
        let now = Utc::now();
        let original = job("a", PRIORITY_NORMAL, now);
        let requeued = original.started_on(agent(), now).requeued();

        assert_eq!(requeued.retry_count, 1);
        assert!(requeued.build_agent.is_none());
        assert!(requeued.timing.build_start_date.is_none());
        assert_eq!(requeued.timing.submission_date, now);
    }

    #[test]
    fn test_timing_consistency_detects_completion_before_start() {
        let now = Utc::now();
        let mut timing = JobTimingInfo::queued(now, 10);
        timing.build_start_date = Some(now + Duration::seconds(5));
        timing.build_completion_date = Some(now);
        assert!(!timing.is_consistent());
    }

    #[test]
    fn test_finished_projection_carries_agent_address_and_commit() {
        let now = Utc::now();
        let running = job("a", PRIORITY_NORMAL, now).started_on(agent(), now);
        let finished = FinishedBuildJob::from_job(
            &running,
            BuildStatus::Successful,
            now + Duration::seconds(42),
            None,
        );

        assert_eq!(finished.build_agent_address, "10.0.0.5:7921");
        assert_eq!(finished.commit_hash.as_deref(), Some("abc123"));
        assert_eq!(
            finished.timing.build_completion_date,
            Some(now + Duration::seconds(42))
        );
        assert!(finished.timing.is_consistent());
    }

    #[test]
    fn test_summary_over_both_shapes() {
        let now = Utc::now();
        let pending = job("a", PRIORITY_NORMAL, now);
        assert_eq!(
            BuildJobRecord::Live(pending.clone()).summary().state,
            JobState::Pending
        );

        let running = pending.started_on(agent(), now);
        assert_eq!(
            BuildJobRecord::Live(running.clone()).summary().state,
            JobState::Running
        );

        let finished = FinishedBuildJob::from_job(&running, BuildStatus::Failed, now, None);
        let summary = BuildJobRecord::Finished(finished).summary();
        assert_eq!(summary.state, JobState::Finished(BuildStatus::Failed));
        assert_eq!(summary.build_agent.as_deref(), Some("10.0.0.5:7921"));
    }
}
