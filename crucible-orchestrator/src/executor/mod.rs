//! Executor adapter
//!
//! The scheduler never talks to a build backend directly; it goes through an
//! [`Executor`]. The adapter is a pure RPC boundary: authentication and
//! job-config templating for a remote CI backend live inside the adapter, and
//! the orchestrator only sees the four calls below. [`LocalExecutor`] is the
//! implementation shipped here, where agents pull their assigned set over the
//! HTTP API and `trigger` is the handoff point.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crucible_core::domain::build::{BuildConfig, RepositoryInfo};
use crucible_core::domain::job::BuildStatus;

use crate::store::QueueStore;

/// Opaque identifier a backend hands out when a build is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalBuildId(pub String);

impl std::fmt::Display for ExternalBuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a build as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalBuildState {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// Dispatch-time errors. `Rejected` means the backend refused the job and a
/// retry may succeed later; `Unreachable` means the call never got through.
#[derive(Debug)]
pub enum ExecutorError {
    Rejected(String),
    Unreachable(String),
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorError::Rejected(msg) => write!(f, "executor rejected job: {msg}"),
            ExecutorError::Unreachable(msg) => write!(f, "executor unreachable: {msg}"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Contract a build backend adapter has to satisfy.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Provisions the project container (folder, namespace) if the backend
    /// needs one. Idempotent.
    async fn create_if_missing(&self, project_key: &str) -> Result<(), ExecutorError>;

    /// Creates or updates the backend-side job definition for `job_name`.
    /// Idempotent.
    async fn ensure_job_exists(
        &self,
        project_key: &str,
        job_name: &str,
        config: &BuildConfig,
        repositories: &RepositoryInfo,
    ) -> Result<ExternalBuildId, ExecutorError>;

    /// Starts a build of an existing job definition.
    async fn trigger(
        &self,
        project_key: &str,
        job_name: &str,
    ) -> Result<ExternalBuildId, ExecutorError>;

    /// Reads the backend's view of a triggered build.
    async fn poll_status(
        &self,
        job_name: &str,
        build_id: &ExternalBuildId,
    ) -> Result<ExternalBuildState, ExecutorError>;
}

/// Executor for the built-in agent fleet.
///
/// There is no remote backend to provision: the claim in the store already
/// placed the job in its agent's running set, and the agent picks it up on
/// its next poll. `trigger` only mints a build id; `poll_status` answers from
/// the store.
pub struct LocalExecutor<S> {
    store: S,
    sequence: Arc<AtomicU64>,
}

impl<S> LocalExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<S: Clone> Clone for LocalExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }
}

#[async_trait]
impl<S: QueueStore + Clone> Executor for LocalExecutor<S> {
    async fn create_if_missing(&self, _project_key: &str) -> Result<(), ExecutorError> {
        Ok(())
    }

    async fn ensure_job_exists(
        &self,
        _project_key: &str,
        _job_name: &str,
        _config: &BuildConfig,
        _repositories: &RepositoryInfo,
    ) -> Result<ExternalBuildId, ExecutorError> {
        Ok(self.next_id())
    }

    async fn trigger(
        &self,
        _project_key: &str,
        _job_name: &str,
    ) -> Result<ExternalBuildId, ExecutorError> {
        Ok(self.next_id())
    }

    async fn poll_status(
        &self,
        job_name: &str,
        _build_id: &ExternalBuildId,
    ) -> Result<ExternalBuildState, ExecutorError> {
        let live = self
            .store
            .get_job(job_name)
            .await
            .map_err(|err| ExecutorError::Unreachable(err.to_string()))?;
        if let Some(job) = live {
            return Ok(if job.build_agent.is_some() {
                ExternalBuildState::Running
            } else {
                ExternalBuildState::Queued
            });
        }

        let finished = self
            .store
            .find_finished(job_name)
            .await
            .map_err(|err| ExecutorError::Unreachable(err.to_string()))?;
        match finished {
            Some(record) => Ok(match record.status {
                BuildStatus::Successful => ExternalBuildState::Success,
                BuildStatus::Cancelled => ExternalBuildState::Cancelled,
                BuildStatus::Failed | BuildStatus::Error | BuildStatus::Timeout => {
                    ExternalBuildState::Failed
                }
            }),
            None => Err(ExecutorError::Rejected(format!("unknown job: {job_name}"))),
        }
    }
}

impl<S> LocalExecutor<S> {
    fn next_id(&self) -> ExternalBuildId {
        ExternalBuildId(self.sequence.fetch_add(1, Ordering::Relaxed).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{make_agent, make_job};
    use chrono::Utc;
    use crucible_core::domain::job::FinishedBuildJob;

    #[tokio::test]
    async fn test_poll_status_tracks_job_lifecycle() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let executor = LocalExecutor::new(store.clone());
        let build_id = ExternalBuildId("1".to_string());

        store.upsert_agent(make_agent("agent-1", 1, now)).await.unwrap();
        store.enqueue(make_job("job-1", 3, now)).await.unwrap();
        assert_eq!(
            executor.poll_status("job-1", &build_id).await.unwrap(),
            ExternalBuildState::Queued
        );

        let claimed = store.claim_next("agent-1", now).await.unwrap().unwrap();
        assert_eq!(
            executor.poll_status("job-1", &build_id).await.unwrap(),
            ExternalBuildState::Running
        );

        let job = store.take_running("job-1").await.unwrap().unwrap();
        assert_eq!(job.id, claimed.id);
        store
            .append_finished(FinishedBuildJob::from_job(
                &job,
                BuildStatus::Successful,
                now,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(
            executor.poll_status("job-1", &build_id).await.unwrap(),
            ExternalBuildState::Success
        );
    }

    #[tokio::test]
    async fn test_poll_status_unknown_job_is_rejected() {
        let executor = LocalExecutor::new(MemoryStore::new());
        let result = executor
            .poll_status("no-such-job", &ExternalBuildId("1".to_string()))
            .await;
        assert!(matches!(result, Err(ExecutorError::Rejected(_))));
    }

    #[test]
    fn test_trigger_ids_are_unique() {
        let executor = LocalExecutor::new(MemoryStore::new());
        let a = executor.next_id();
        let b = executor.next_id();
        assert_ne!(a, b);
    }
}
