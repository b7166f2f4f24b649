//! Assigned-jobs poller
//!
//! Polls the orchestrator for the jobs assigned to this agent and executes
//! them. Concurrency is bounded by a semaphore sized to the agent's
//! capacity; the orchestrator enforces the ceiling on its side too, so the
//! semaphore is only the local backstop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, error, info, warn};

use crucible_client::OrchestratorClient;
use crucible_core::domain::job::BuildJob;
use crucible_core::dto::job::ResultOutcome;

use crate::config::Config;
use crate::executor::{BuildExecutor, CancellationSignal};

/// Job poller that continuously polls for and executes assigned jobs
pub struct JobPoller {
    config: Config,
    client: Arc<OrchestratorClient>,
    executor: BuildExecutor,
    semaphore: Arc<Semaphore>,
    /// Jobs currently executing locally; assigned jobs stay in the
    /// orchestrator's running set for the whole build, so the poll result
    /// alone cannot tell fresh assignments from builds already in progress
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(config: Config, client: Arc<OrchestratorClient>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_builds as usize));
        let executor = BuildExecutor::new(config.cancellation_poll_interval);
        Self {
            config,
            client,
            executor,
            semaphore,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) {
        info!(
            "Starting job poller (interval: {:?})",
            self.config.poll_interval
        );

        let _heartbeat_handle = self.start_heartbeat_loop();

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for assigned jobs");

            if let Err(e) = self.poll_once().await {
                error!("Error during poll cycle: {}", e);
            }
        }
    }

    /// Performs a single poll cycle
    async fn poll_once(&self) -> crucible_client::Result<()> {
        let assigned = self.client.assigned_jobs(&self.config.agent_name).await?;

        for entry in assigned {
            let job_id = entry.job.id.clone();
            if self.in_flight.lock().unwrap().contains(&job_id) {
                continue;
            }

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("All build slots busy, deferring job {}", job_id);
                break;
            };

            self.in_flight.lock().unwrap().insert(job_id);
            self.spawn_job_task(entry.job, entry.cancellation_requested, permit);
        }

        Ok(())
    }

    /// Spawns a task to execute a single job
    fn spawn_job_task(
        &self,
        job: BuildJob,
        already_cancelled: bool,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let client = Arc::clone(&self.client);
        let executor = self.executor.clone();
        let agent_name = self.config.agent_name.clone();
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            // Holds the build slot until the result is reported
            let _permit = permit;
            let job_id = job.id.clone();
            let outcome = if already_cancelled {
                info!("Job {} was cancelled before it started", job_id);
                ResultOutcome::Cancelled
            } else {
                let cancel = RemoteCancellation {
                    client: Arc::clone(&client),
                    agent_name,
                };
                executor.execute(&job, &cancel).await
            };

            report_with_retry(&client, &job_id, outcome).await;
            in_flight.lock().unwrap().remove(&job_id);
        });
    }

    /// Starts a background task to send heartbeats
    fn start_heartbeat_loop(&self) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let agent_name = self.config.agent_name.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat_interval);

            loop {
                ticker.tick().await;

                debug!("Sending heartbeat");

                if let Err(e) = client.heartbeat(&agent_name).await {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }
        })
    }
}

/// Reports a result, retrying transient failures a few times.
///
/// A 409 means some other path already resolved the job (duplicate notice
/// or an eviction race); that is final, not retryable.
async fn report_with_retry(client: &OrchestratorClient, job_id: &str, outcome: ResultOutcome) {
    const ATTEMPTS: u32 = 5;

    for attempt in 1..=ATTEMPTS {
        match client.report_result(job_id, outcome.clone()).await {
            Ok(()) => {
                info!("Reported result for job {}", job_id);
                return;
            }
            Err(err) if err.is_conflict() => {
                warn!("Result for job {} already resolved elsewhere", job_id);
                return;
            }
            Err(err) => {
                warn!(
                    "Failed to report result for job {} (attempt {}/{}): {}",
                    job_id, attempt, ATTEMPTS, err
                );
                time::sleep(Duration::from_secs(2 * attempt as u64)).await;
            }
        }
    }

    // The orchestrator's liveness sweep will eventually re-queue the job
    error!("Giving up on reporting result for job {}", job_id);
}

/// Cancellation signal backed by the orchestrator's assigned-jobs endpoint.
struct RemoteCancellation {
    client: Arc<OrchestratorClient>,
    agent_name: String,
}

#[async_trait]
impl CancellationSignal for RemoteCancellation {
    async fn is_cancelled(&self, job_id: &str) -> bool {
        match self.client.assigned_jobs(&self.agent_name).await {
            Ok(assigned) => assigned
                .iter()
                .any(|entry| entry.job.id == job_id && entry.cancellation_requested),
            Err(err) => {
                debug!("Cancellation poll failed for job {}: {}", job_id, err);
                false
            }
        }
    }
}
