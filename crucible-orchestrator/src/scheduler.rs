//! Scheduler
//!
//! Reconciliation task that moves jobs from the pending set onto agents. One
//! instance runs on every orchestrator node; coordination happens entirely
//! through the [`QueueStore`], whose `claim_next` guarantees that two nodes
//! never assign the same job twice.
//!
//! A tick has two phases. First every `Active` agent with spare capacity
//! claims jobs until it is full or the queue is empty. Then the claimed jobs
//! are dispatched through the [`Executor`], strictly after the claim, so no
//! store lock is ever held across a network call. A synchronous dispatch
//! failure pushes the job back into the pending set with `retry_count + 1`,
//! or finalises it as terminal `Error` once the retry ceiling is reached.

use std::time::Duration;

use crucible_core::domain::job::{BuildJob, BuildStatus, FinishedBuildJob};

use crate::clock::Clock;
use crate::executor::Executor;
use crate::store::{QueueStore, StoreError};

/// Dispatch retries a job gets before it turns into terminal `Error`.
pub const DEFAULT_DISPATCH_RETRY_CEILING: u32 = 5;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between reconciliation ticks.
    pub interval: Duration,
    /// A job whose `retry_count` has reached this value is not re-queued
    /// after a dispatch failure.
    pub dispatch_retry_ceiling: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            dispatch_retry_ceiling: DEFAULT_DISPATCH_RETRY_CEILING,
        }
    }
}

pub struct Scheduler<S, C, E> {
    store: S,
    clock: C,
    executor: E,
    config: SchedulerConfig,
}

impl<S, C, E> Scheduler<S, C, E>
where
    S: QueueStore,
    C: Clock,
    E: Executor,
{
    pub fn new(store: S, clock: C, executor: E, config: SchedulerConfig) -> Self {
        Self {
            store,
            clock,
            executor,
            config,
        }
    }

    /// Runs reconciliation ticks forever. Store errors are logged and the
    /// loop keeps going; a flaky store must not kill the scheduler.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = self.tick().await {
                tracing::error!("Scheduler tick failed: {}", err);
            }
        }
    }

    /// One reconciliation pass. Returns the number of jobs dispatched.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        let claimed = self.claim_phase().await?;
        let mut dispatched = 0;
        for job in claimed {
            if self.dispatch(job).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Claims jobs for every eligible agent. `claim_next` itself skips paused
    /// agents and enforces the capacity ceiling, so this only iterates.
    async fn claim_phase(&self) -> Result<Vec<BuildJob>, StoreError> {
        let mut claimed = Vec::new();
        for agent in self.store.list_agents().await? {
            loop {
                match self.store.claim_next(&agent.agent.name, self.clock.now()).await {
                    Ok(Some(job)) => {
                        tracing::debug!(
                            "Job {} assigned to agent {}",
                            job.id,
                            agent.agent.name
                        );
                        claimed.push(job);
                    }
                    Ok(None) => break,
                    // The agent may have been evicted between list and claim
                    Err(StoreError::AgentNotFound(name)) => {
                        tracing::debug!("Agent {} vanished before claim", name);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(claimed)
    }

    /// Hands one claimed job to the executor. Returns whether the job is now
    /// running; on failure it has been re-queued or finalised as `Error`.
    async fn dispatch(&self, job: BuildJob) -> Result<bool, StoreError> {
        let project_key = format!("exercise-{}", job.exercise_id);

        let triggered = async {
            self.executor.create_if_missing(&project_key).await?;
            self.executor
                .ensure_job_exists(&project_key, &job.id, &job.build_config, &job.repository_info)
                .await?;
            self.executor.trigger(&project_key, &job.id).await
        }
        .await;

        match triggered {
            Ok(build_id) => {
                tracing::info!("Job {} dispatched (external build {})", job.id, build_id);
                Ok(true)
            }
            Err(err) => {
                tracing::warn!("Dispatch of job {} failed: {}", job.id, err);
                self.handle_dispatch_failure(job).await?;
                Ok(false)
            }
        }
    }

    async fn handle_dispatch_failure(&self, job: BuildJob) -> Result<(), StoreError> {
        // Some other node may already have resolved the job
        let Some(job) = self.store.take_running(&job.id).await? else {
            tracing::debug!("Job {} no longer running after failed dispatch", job.id);
            return Ok(());
        };

        if job.retry_count >= self.config.dispatch_retry_ceiling {
            tracing::error!(
                "Job {} exhausted {} dispatch retries, marking as error",
                job.id,
                job.retry_count
            );
            // The claim stamped an agent and a start date, but the build
            // never ran; the finished record must not show either
            let mut job = job;
            job.build_agent = None;
            job.timing.build_start_date = None;
            job.timing.estimated_completion_date = None;
            let record =
                FinishedBuildJob::from_job(&job, BuildStatus::Error, self.clock.now(), None);
            self.store.append_finished(record).await?;
        } else {
            tracing::info!(
                "Re-queueing job {} after dispatch failure (retry {})",
                job.id,
                job.retry_count + 1
            );
            self.store.requeue(job.requeued()).await?;
        }
        Ok(())
    }
}
