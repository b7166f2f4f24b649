//! Distributed queue store
//!
//! The pending set, the per-agent running sets, the agent registry and the
//! finished-job history are the only mutable shared state in the system, and
//! all of it is owned by a [`QueueStore`]. Every scheduler and router instance
//! on every node goes through the same store; no component keeps a private
//! mutable copy across a scheduling decision.
//!
//! The store must provide per-entry-group atomicity: [`QueueStore::claim_next`]
//! is a single atomic pop-and-assign, and [`QueueStore::record_outcome`] is an
//! atomic read-modify-write of one agent's counters. Full multi-key
//! transactions are not required.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crucible_core::domain::agent::{AgentInfo, AgentRef, AgentStatus};
use crucible_core::domain::job::{BuildJob, BuildStatus, FinishedBuildJob};
use crucible_core::dto::stats::{QueueStatistics, StatisticsFilter};

/// Errors surfaced by store operations.
#[derive(Debug)]
pub enum StoreError {
    /// A job with this id already exists (pending, running or finished)
    DuplicateJob(String),
    /// The named agent is not in the registry
    AgentNotFound(String),
    /// The backing store could not be reached or rejected the operation
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateJob(id) => write!(f, "duplicate job id: {id}"),
            StoreError::AgentNotFound(name) => write!(f, "agent not found: {name}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Cluster-wide store for the job queue, the agent registry and the
/// finished-job history.
///
/// Implementations must never assume a single process: any strongly
/// consistent backend with per-key compare-and-swap works. [`postgres`] is
/// the production implementation, [`memory`] serves tests and single-node
/// development.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    // --- pending / running sets ---

    /// Inserts a freshly submitted job into the pending set.
    ///
    /// Rejects duplicate ids across pending, running and finished jobs.
    /// Never partially inserts.
    async fn enqueue(&self, job: BuildJob) -> Result<(), StoreError>;

    /// Pushes a job back into the pending set after an infra fault. The job
    /// id already existed before, so no duplicate check applies.
    async fn requeue(&self, job: BuildJob) -> Result<(), StoreError>;

    /// The atomic pop-and-assign: if the named agent is `Active` and below
    /// its capacity ceiling, removes the least `(priority, submission_date,
    /// id)` pending job, stamps it with the agent and `now`, and adds it to
    /// the agent's running set.
    ///
    /// Returns `None` when the queue is empty, the agent is paused, or the
    /// agent is at capacity. Two concurrent callers can never claim the same
    /// job or overshoot the ceiling.
    async fn claim_next(
        &self,
        agent_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BuildJob>, StoreError>;

    /// Removes a job from the pending set, e.g. for a pre-dispatch cancel.
    async fn remove_pending(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError>;

    /// Removes a job from its agent's running set.
    ///
    /// Returns `None` if the job is not running, which is how duplicate
    /// completion notices are detected.
    async fn take_running(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError>;

    /// Looks a job up in the pending or running set.
    async fn get_job(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError>;

    /// All pending jobs in scheduling order. Bounded-staleness read.
    async fn pending_jobs(&self) -> Result<Vec<BuildJob>, StoreError>;

    /// All running jobs. Bounded-staleness read.
    async fn running_jobs(&self) -> Result<Vec<BuildJob>, StoreError>;

    /// Running jobs assigned to one agent; what the agent polls.
    async fn running_jobs_for_agent(&self, agent_name: &str)
    -> Result<Vec<BuildJob>, StoreError>;

    /// Flags a running job for cooperative cancellation. Returns false if
    /// the job is not running.
    async fn request_cancellation(&self, job_id: &str) -> Result<bool, StoreError>;

    /// Whether cancellation was requested for a running job.
    async fn cancellation_requested(&self, job_id: &str) -> Result<bool, StoreError>;

    // --- agent registry ---

    /// Inserts or refreshes an agent registry entry.
    ///
    /// On re-registration the identity, capacity, fingerprint, heartbeat,
    /// process start date and build image revision are taken from `info`
    /// while the rolling build counters, consecutive-failure count and pause
    /// state of the existing entry survive.
    async fn upsert_agent(&self, info: AgentInfo) -> Result<(), StoreError>;

    async fn get_agent(&self, name: &str) -> Result<Option<AgentInfo>, StoreError>;

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, StoreError>;

    /// Updates the agent's heartbeat timestamp. Returns false if unknown.
    async fn heartbeat(&self, name: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Writes a new capacity ceiling. Validation happens in the service
    /// layer; the store only persists.
    async fn set_capacity(&self, name: &str, max_concurrent_builds: u32)
    -> Result<(), StoreError>;

    /// Sets the agent's health status, optionally resetting the
    /// consecutive-failure counter (used by operator reactivation).
    async fn set_agent_status(
        &self,
        name: &str,
        status: AgentStatus,
        reset_consecutive_failures: bool,
    ) -> Result<(), StoreError>;

    /// Atomically folds one terminal build outcome into the agent's rolling
    /// counters, updates the consecutive-failure count, and applies
    /// auto-pause when the agent's threshold is reached.
    ///
    /// Returns the agent's status after the update.
    async fn record_outcome(
        &self,
        name: &str,
        status: BuildStatus,
        duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<AgentStatus, StoreError>;

    /// Removes every agent whose last heartbeat is older than `cutoff`,
    /// taking their running jobs out of the running set. Returns the evicted
    /// agents paired with their orphaned jobs, which the caller re-queues as
    /// infra failures.
    async fn evict_agents_stale_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(AgentRef, Vec<BuildJob>)>, StoreError>;

    // --- finished history ---

    /// Appends a finished-job record. Written once, never mutated.
    async fn append_finished(&self, record: FinishedBuildJob) -> Result<(), StoreError>;

    async fn find_finished(&self, job_id: &str) -> Result<Option<FinishedBuildJob>, StoreError>;

    /// Aggregates over the finished history. Bounded-staleness read.
    async fn statistics(&self, filter: &StatisticsFilter) -> Result<QueueStatistics, StoreError>;
}
