//! Result router
//!
//! Processes the terminal signals agents send for their running jobs. Every
//! job resolves to exactly one terminal state: the removal from the running
//! set is the commit point, so a second notice for the same job finds nothing
//! to remove and is rejected as a conflict without touching any state.

use chrono::{DateTime, Utc};

use crucible_core::domain::agent::AgentStatus;
use crucible_core::domain::build::BuildResult;
use crucible_core::domain::job::{BuildJob, BuildStatus, FinishedBuildJob};
use crucible_core::dto::job::{ResultNotice, ResultOutcome};

use crate::store::{QueueStore, StoreError};

/// Service error type
#[derive(Debug)]
pub enum ResultError {
    /// The job is not in the running set: the notice is a duplicate or
    /// arrived for a job another path already resolved
    StaleNotice(String),
    StoreError(StoreError),
}

impl From<StoreError> for ResultError {
    fn from(err: StoreError) -> Self {
        ResultError::StoreError(err)
    }
}

/// Route one result notice.
///
/// Build and cancellation outcomes finalise the job; an infrastructure
/// failure pushes it back into the pending set until the retry ceiling turns
/// it into a terminal `Error`.
pub async fn process_notice<S: QueueStore>(
    store: &S,
    notice: ResultNotice,
    retry_ceiling: u32,
    now: DateTime<Utc>,
) -> Result<(), ResultError> {
    let Some(job) = store.take_running(&notice.job_id).await? else {
        tracing::warn!(
            "Conflicting result notice for job {} ignored, job is not running",
            notice.job_id
        );
        return Err(ResultError::StaleNotice(notice.job_id));
    };

    let duration_secs = job
        .timing
        .build_start_date
        .map(|start| (now - start).num_seconds())
        .unwrap_or(0);

    match notice.outcome {
        ResultOutcome::Finished(result) => {
            let status = if result.successful {
                BuildStatus::Successful
            } else {
                BuildStatus::Failed
            };
            finalize(store, job, status, Some(result), duration_secs, now).await
        }
        ResultOutcome::Cancelled => {
            finalize(store, job, BuildStatus::Cancelled, None, duration_secs, now).await
        }
        ResultOutcome::TimedOut => {
            finalize(store, job, BuildStatus::Timeout, None, duration_secs, now).await
        }
        ResultOutcome::InfraFailure { reason } => {
            handle_infra_failure(store, job, reason, retry_ceiling, duration_secs, now).await
        }
    }
}

/// Re-queue an orphaned job after its agent was evicted. Same policy as an
/// agent-reported infrastructure failure, minus the agent bookkeeping (the
/// agent is already gone).
pub async fn requeue_orphan<S: QueueStore>(
    store: &S,
    job: BuildJob,
    reason: &str,
    retry_ceiling: u32,
    now: DateTime<Utc>,
) -> Result<(), ResultError> {
    requeue_or_error(store, job, reason, retry_ceiling, now).await
}

async fn finalize<S: QueueStore>(
    store: &S,
    job: BuildJob,
    status: BuildStatus,
    result: Option<BuildResult>,
    duration_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), ResultError> {
    let record = FinishedBuildJob::from_job(&job, status, now, result);
    store.append_finished(record).await?;
    tracing::info!("Job {} finished with status {}", job.id, status);

    note_agent_outcome(store, &job, status, duration_secs, now).await?;
    Ok(())
}

async fn handle_infra_failure<S: QueueStore>(
    store: &S,
    job: BuildJob,
    reason: String,
    retry_ceiling: u32,
    duration_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), ResultError> {
    tracing::warn!("Infrastructure failure on job {}: {}", job.id, reason);

    // The agent's own health bookkeeping counts this as a failure even
    // though the job itself is not resolved yet
    note_agent_outcome(store, &job, BuildStatus::Failed, duration_secs, now).await?;

    requeue_or_error(store, job, &reason, retry_ceiling, now).await
}

async fn requeue_or_error<S: QueueStore>(
    store: &S,
    job: BuildJob,
    reason: &str,
    retry_ceiling: u32,
    now: DateTime<Utc>,
) -> Result<(), ResultError> {
    if job.retry_count >= retry_ceiling {
        tracing::error!(
            "Job {} exhausted {} retries, marking as error: {}",
            job.id,
            job.retry_count,
            reason
        );
        let result = BuildResult::failed(job.build_config.branch.clone(), reason);
        let record = FinishedBuildJob::from_job(&job, BuildStatus::Error, now, Some(result));
        store.append_finished(record).await?;
    } else {
        tracing::info!(
            "Re-queueing job {} after infrastructure failure (retry {})",
            job.id,
            job.retry_count + 1
        );
        store.requeue(job.requeued()).await?;
    }
    Ok(())
}

async fn note_agent_outcome<S: QueueStore>(
    store: &S,
    job: &BuildJob,
    status: BuildStatus,
    duration_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), ResultError> {
    let Some(agent) = &job.build_agent else {
        return Ok(());
    };
    match store
        .record_outcome(&agent.name, status, duration_secs, now)
        .await
    {
        Ok(AgentStatus::SelfPaused) => {
            tracing::warn!(
                "Agent {} paused itself after repeated consecutive failures",
                agent.name
            );
            Ok(())
        }
        Ok(_) => Ok(()),
        // The agent may have been evicted while the job was in flight
        Err(StoreError::AgentNotFound(name)) => {
            tracing::debug!("Outcome for job {} not recorded, agent {} is gone", job.id, name);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{make_agent, make_job};
    use crucible_core::domain::job::PRIORITY_NORMAL;

    async fn store_with_running_job(job_id: &str) -> (MemoryStore, DateTime<Utc>) {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.upsert_agent(make_agent("agent-1", 4, now)).await.unwrap();
        store
            .enqueue(make_job(job_id, PRIORITY_NORMAL, now))
            .await
            .unwrap();
        store.claim_next("agent-1", now).await.unwrap().unwrap();
        (store, now)
    }

    fn success_notice(job_id: &str) -> ResultNotice {
        ResultNotice {
            job_id: job_id.to_string(),
            outcome: ResultOutcome::Finished(BuildResult {
                successful: true,
                branch: "main".to_string(),
                assignment_commit_hash: Some("abc".to_string()),
                test_commit_hash: None,
                exit_code: Some(0),
                error_message: None,
                log_lines: vec![],
            }),
        }
    }

    #[tokio::test]
    async fn test_success_finalizes_and_updates_agent() {
        let (store, now) = store_with_running_job("job-1").await;
        process_notice(&store, success_notice("job-1"), 5, now)
            .await
            .unwrap();

        assert!(store.get_job("job-1").await.unwrap().is_none());
        let finished = store.find_finished("job-1").await.unwrap().unwrap();
        assert_eq!(finished.status, BuildStatus::Successful);
        assert!(finished.result.unwrap().successful);

        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.stats.successful_builds, 1);
        assert_eq!(agent.stats.total_builds, 1);
    }

    #[tokio::test]
    async fn test_duplicate_notice_is_a_stale_conflict() {
        let (store, now) = store_with_running_job("job-1").await;
        process_notice(&store, success_notice("job-1"), 5, now)
            .await
            .unwrap();

        let err = process_notice(&store, success_notice("job-1"), 5, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ResultError::StaleNotice(_)));

        // Nothing changed on the second notice
        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.stats.total_builds, 1);
    }

    #[tokio::test]
    async fn test_timeout_finalizes_as_timeout() {
        let (store, now) = store_with_running_job("job-1").await;
        let notice = ResultNotice {
            job_id: "job-1".to_string(),
            outcome: ResultOutcome::TimedOut,
        };
        process_notice(&store, notice, 5, now).await.unwrap();

        let finished = store.find_finished("job-1").await.unwrap().unwrap();
        assert_eq!(finished.status, BuildStatus::Timeout);
        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.stats.timed_out_builds, 1);
    }

    #[tokio::test]
    async fn test_cancellation_ack_finalizes_as_cancelled() {
        let (store, now) = store_with_running_job("job-1").await;
        store.request_cancellation("job-1").await.unwrap();

        let notice = ResultNotice {
            job_id: "job-1".to_string(),
            outcome: ResultOutcome::Cancelled,
        };
        process_notice(&store, notice, 5, now).await.unwrap();

        let finished = store.find_finished("job-1").await.unwrap().unwrap();
        assert_eq!(finished.status, BuildStatus::Cancelled);

        // Cancelled builds do not count towards the failure streak
        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.consecutive_failures, 0);
        assert_eq!(agent.stats.cancelled_builds, 1);
    }

    #[tokio::test]
    async fn test_infra_failure_requeues_until_ceiling() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.upsert_agent(make_agent("agent-1", 1, now)).await.unwrap();
        store
            .enqueue(make_job("job-1", PRIORITY_NORMAL, now))
            .await
            .unwrap();

        let notice = || ResultNotice {
            job_id: "job-1".to_string(),
            outcome: ResultOutcome::InfraFailure {
                reason: "container failed to start".to_string(),
            },
        };

        // Crash 1: retry_count 0 -> re-queued with 1
        store.claim_next("agent-1", now).await.unwrap().unwrap();
        process_notice(&store, notice(), 2, now).await.unwrap();
        let job = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.build_agent.is_none());

        // Crash 2: retry_count 1 -> re-queued with 2
        store.claim_next("agent-1", now).await.unwrap().unwrap();
        process_notice(&store, notice(), 2, now).await.unwrap();
        assert_eq!(store.get_job("job-1").await.unwrap().unwrap().retry_count, 2);

        // Crash 3: ceiling reached -> terminal Error
        store.claim_next("agent-1", now).await.unwrap().unwrap();
        process_notice(&store, notice(), 2, now).await.unwrap();
        assert!(store.get_job("job-1").await.unwrap().is_none());
        let finished = store.find_finished("job-1").await.unwrap().unwrap();
        assert_eq!(finished.status, BuildStatus::Error);
        assert_eq!(
            finished.result.unwrap().error_message.as_deref(),
            Some("container failed to start")
        );

        // Every crash counted against the agent's health
        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.stats.failed_builds, 3);
    }

    #[tokio::test]
    async fn test_failures_auto_pause_agent_at_threshold() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let mut agent = make_agent("agent-1", 4, now);
        agent.pause_after_consecutive_failures = 2;
        store.upsert_agent(agent).await.unwrap();

        for i in 0..2 {
            let id = format!("job-{i}");
            store
                .enqueue(make_job(&id, PRIORITY_NORMAL, now))
                .await
                .unwrap();
            store.claim_next("agent-1", now).await.unwrap().unwrap();
            let notice = ResultNotice {
                job_id: id,
                outcome: ResultOutcome::Finished(BuildResult::failed("main", "tests failed")),
            };
            process_notice(&store, notice, 5, now).await.unwrap();
        }

        let agent = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::SelfPaused);
        assert_eq!(agent.consecutive_failures, 2);
    }
}
