//! In-memory queue store
//!
//! Single-node [`QueueStore`] backed by ordered maps behind a mutex. Every
//! operation takes the lock once, so the atomicity contract of the trait
//! holds trivially. Used by the test suites and for single-node development;
//! production clusters use [`super::postgres`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crucible_core::domain::agent::{AgentInfo, AgentRef, AgentStatus};
use crucible_core::domain::job::{BuildJob, BuildStatus, FinishedBuildJob};
use crucible_core::dto::stats::{QueueStatistics, StatisticsFilter};

use super::{QueueStore, StoreError};

/// Key ordering the pending set by `(priority, submission_date, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    priority: i32,
    submission_date: DateTime<Utc>,
    id: String,
}

impl OrderKey {
    fn of(job: &BuildJob) -> Self {
        Self {
            priority: job.priority,
            submission_date: job.timing.submission_date,
            id: job.id.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    pending: BTreeMap<OrderKey, BuildJob>,
    pending_ids: HashMap<String, OrderKey>,
    running: HashMap<String, BuildJob>,
    cancellations: HashSet<String>,
    agents: HashMap<String, AgentInfo>,
    finished: HashMap<String, FinishedBuildJob>,
}

impl Inner {
    fn current_builds(&self, agent_name: &str) -> u32 {
        self.running
            .values()
            .filter(|job| {
                job.build_agent
                    .as_ref()
                    .is_some_and(|agent| agent.name == agent_name)
            })
            .count() as u32
    }

    fn agent_with_load(&self, info: &AgentInfo) -> AgentInfo {
        let mut info = info.clone();
        info.current_builds = self.current_builds(&info.agent.name);
        info
    }
}

/// In-memory store; cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, job: BuildJob) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.pending_ids.contains_key(&job.id)
            || inner.running.contains_key(&job.id)
            || inner.finished.contains_key(&job.id)
        {
            return Err(StoreError::DuplicateJob(job.id));
        }
        let key = OrderKey::of(&job);
        inner.pending_ids.insert(job.id.clone(), key.clone());
        inner.pending.insert(key, job);
        Ok(())
    }

    async fn requeue(&self, job: BuildJob) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = OrderKey::of(&job);
        inner.pending_ids.insert(job.id.clone(), key.clone());
        inner.pending.insert(key, job);
        Ok(())
    }

    async fn claim_next(
        &self,
        agent_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BuildJob>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.agents.get(agent_name).cloned() else {
            return Err(StoreError::AgentNotFound(agent_name.to_string()));
        };
        if info.status != AgentStatus::Active {
            return Ok(None);
        }
        if inner.current_builds(agent_name) >= info.max_concurrent_builds {
            return Ok(None);
        }
        let Some(key) = inner.pending.keys().next().cloned() else {
            return Ok(None);
        };
        let job = inner
            .pending
            .remove(&key)
            .ok_or_else(|| StoreError::Unavailable("pending index out of sync".to_string()))?;
        inner.pending_ids.remove(&job.id);

        let started = job.started_on(info.agent.clone(), now);
        inner.running.insert(started.id.clone(), started.clone());
        Ok(Some(started))
    }

    async fn remove_pending(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(key) = inner.pending_ids.remove(job_id) else {
            return Ok(None);
        };
        Ok(inner.pending.remove(&key))
    }

    async fn take_running(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.cancellations.remove(job_id);
        Ok(inner.running.remove(job_id))
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError> {
        let inner = self.inner.lock().await;
        if let Some(key) = inner.pending_ids.get(job_id) {
            return Ok(inner.pending.get(key).cloned());
        }
        Ok(inner.running.get(job_id).cloned())
    }

    async fn pending_jobs(&self) -> Result<Vec<BuildJob>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.pending.values().cloned().collect())
    }

    async fn running_jobs(&self) -> Result<Vec<BuildJob>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.running.values().cloned().collect())
    }

    async fn running_jobs_for_agent(
        &self,
        agent_name: &str,
    ) -> Result<Vec<BuildJob>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .running
            .values()
            .filter(|job| {
                job.build_agent
                    .as_ref()
                    .is_some_and(|agent| agent.name == agent_name)
            })
            .cloned()
            .collect())
    }

    async fn request_cancellation(&self, job_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.running.contains_key(job_id) {
            return Ok(false);
        }
        inner.cancellations.insert(job_id.to_string());
        Ok(true)
    }

    async fn cancellation_requested(&self, job_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.cancellations.contains(job_id))
    }

    async fn upsert_agent(&self, info: AgentInfo) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.agents.get_mut(&info.agent.name) {
            Some(existing) => {
                // Stats, failure count and pause state survive re-registration
                existing.agent = info.agent;
                existing.max_concurrent_builds = info.max_concurrent_builds;
                existing.public_key_fingerprint = info.public_key_fingerprint;
                existing.pause_after_consecutive_failures = info.pause_after_consecutive_failures;
                existing.last_heartbeat_at = info.last_heartbeat_at;
                existing.stats.start_date = info.stats.start_date;
                existing.stats.build_image_revision = info.stats.build_image_revision;
            }
            None => {
                inner.agents.insert(info.agent.name.clone(), info);
            }
        }
        Ok(())
    }

    async fn get_agent(&self, name: &str) -> Result<Option<AgentInfo>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.agents.get(name).map(|info| inner.agent_with_load(info)))
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, StoreError> {
        let inner = self.inner.lock().await;
        let mut agents: Vec<AgentInfo> = inner
            .agents
            .values()
            .map(|info| inner.agent_with_load(info))
            .collect();
        agents.sort_by(|a, b| a.agent.name.cmp(&b.agent.name));
        Ok(agents)
    }

    async fn heartbeat(&self, name: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.agents.get_mut(name) {
            Some(info) => {
                info.last_heartbeat_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_capacity(
        &self,
        name: &str,
        max_concurrent_builds: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let info = inner
            .agents
            .get_mut(name)
            .ok_or_else(|| StoreError::AgentNotFound(name.to_string()))?;
        info.max_concurrent_builds = max_concurrent_builds;
        Ok(())
    }

    async fn set_agent_status(
        &self,
        name: &str,
        status: AgentStatus,
        reset_consecutive_failures: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let info = inner
            .agents
            .get_mut(name)
            .ok_or_else(|| StoreError::AgentNotFound(name.to_string()))?;
        info.status = status;
        if reset_consecutive_failures {
            info.consecutive_failures = 0;
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        name: &str,
        status: BuildStatus,
        duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<AgentStatus, StoreError> {
        let mut inner = self.inner.lock().await;
        let info = inner
            .agents
            .get_mut(name)
            .ok_or_else(|| StoreError::AgentNotFound(name.to_string()))?;
        info.stats.record(status, duration_secs, now);
        match status {
            BuildStatus::Successful => info.consecutive_failures = 0,
            BuildStatus::Failed | BuildStatus::Error | BuildStatus::Timeout => {
                info.consecutive_failures += 1;
            }
            BuildStatus::Cancelled => {}
        }
        let threshold = info.pause_after_consecutive_failures;
        if threshold > 0
            && info.consecutive_failures >= threshold
            && info.status == AgentStatus::Active
        {
            info.status = AgentStatus::SelfPaused;
        }
        Ok(info.status)
    }

    async fn evict_agents_stale_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(AgentRef, Vec<BuildJob>)>, StoreError> {
        let mut inner = self.inner.lock().await;
        let stale: Vec<String> = inner
            .agents
            .values()
            .filter(|info| info.last_heartbeat_at < cutoff)
            .map(|info| info.agent.name.clone())
            .collect();

        let mut evicted = Vec::new();
        for name in stale {
            let Some(info) = inner.agents.remove(&name) else {
                continue;
            };
            let orphaned_ids: Vec<String> = inner
                .running
                .values()
                .filter(|job| {
                    job.build_agent
                        .as_ref()
                        .is_some_and(|agent| agent.name == name)
                })
                .map(|job| job.id.clone())
                .collect();
            let mut orphaned = Vec::new();
            for id in orphaned_ids {
                inner.cancellations.remove(&id);
                if let Some(job) = inner.running.remove(&id) {
                    orphaned.push(job);
                }
            }
            evicted.push((info.agent, orphaned));
        }
        Ok(evicted)
    }

    async fn append_finished(&self, record: FinishedBuildJob) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.finished.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_finished(&self, job_id: &str) -> Result<Option<FinishedBuildJob>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.finished.get(job_id).cloned())
    }

    async fn statistics(
        &self,
        filter: &StatisticsFilter,
    ) -> Result<QueueStatistics, StoreError> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStatistics::default();
        let mut measured_builds = 0u64;
        let mut total_duration_secs = 0i64;

        for record in inner.finished.values() {
            if filter.course_id.is_some_and(|id| record.course_id != id) {
                continue;
            }
            if filter.exercise_id.is_some_and(|id| record.exercise_id != id) {
                continue;
            }
            let completed = record.timing.build_completion_date;
            if let Some(since) = filter.since {
                if completed.is_none_or(|at| at < since) {
                    continue;
                }
            }
            if let Some(until) = filter.until {
                if completed.is_none_or(|at| at > until) {
                    continue;
                }
            }

            stats.total += 1;
            match record.status {
                BuildStatus::Successful => stats.successful += 1,
                BuildStatus::Failed => stats.failed += 1,
                BuildStatus::Cancelled => stats.cancelled += 1,
                BuildStatus::Error => stats.errored += 1,
                BuildStatus::Timeout => stats.timed_out += 1,
            }
            if let (Some(start), Some(end)) = (record.timing.build_start_date, completed) {
                measured_builds += 1;
                total_duration_secs += (end - start).num_seconds().max(0);
            }
        }

        if measured_builds > 0 {
            stats.average_build_duration_secs = total_duration_secs / measured_builds as i64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_agent, make_job};
    use chrono::Duration;
    use crucible_core::domain::agent::AgentStats;
    use crucible_core::domain::job::{PRIORITY_HIGH, PRIORITY_NORMAL};

    #[tokio::test]
    async fn test_enqueue_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.enqueue(make_job("j1", PRIORITY_NORMAL, now)).await.unwrap();

        let err = store
            .enqueue(make_job("j1", PRIORITY_HIGH, now))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateJob(id) if id == "j1"));
    }

    #[tokio::test]
    async fn test_claim_follows_priority_then_submission_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_agent(make_agent("agent-1", 3, now)).await.unwrap();

        store.enqueue(make_job("a", PRIORITY_NORMAL, now)).await.unwrap();
        store
            .enqueue(make_job("b", PRIORITY_HIGH, now + Duration::seconds(5)))
            .await
            .unwrap();
        store.enqueue(make_job("c", PRIORITY_HIGH, now)).await.unwrap();

        let first = store.claim_next("agent-1", now).await.unwrap().unwrap();
        let second = store.claim_next("agent-1", now).await.unwrap().unwrap();
        let third = store.claim_next("agent-1", now).await.unwrap().unwrap();

        assert_eq!(first.id, "c");
        assert_eq!(second.id, "b");
        assert_eq!(third.id, "a");
        assert_eq!(first.build_agent.unwrap().name, "agent-1");
        assert_eq!(first.timing.build_start_date, Some(now));
    }

    #[tokio::test]
    async fn test_claim_respects_capacity_ceiling() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_agent(make_agent("agent-1", 1, now)).await.unwrap();
        store.enqueue(make_job("a", PRIORITY_NORMAL, now)).await.unwrap();
        store.enqueue(make_job("b", PRIORITY_NORMAL, now)).await.unwrap();

        assert!(store.claim_next("agent-1", now).await.unwrap().is_some());
        assert!(store.claim_next("agent-1", now).await.unwrap().is_none());

        let info = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(info.current_builds, 1);
        assert!(info.current_builds <= info.max_concurrent_builds);
    }

    #[tokio::test]
    async fn test_claim_skips_paused_agent() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut agent = make_agent("agent-1", 2, now);
        agent.status = AgentStatus::Paused;
        store.upsert_agent(agent).await.unwrap();
        store.enqueue(make_job("a", PRIORITY_NORMAL, now)).await.unwrap();

        assert!(store.claim_next("agent-1", now).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_duplicate_assignment() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_agent(make_agent("agent-1", 50, now)).await.unwrap();
        store.upsert_agent(make_agent("agent-2", 50, now)).await.unwrap();
        for i in 0..40 {
            store
                .enqueue(make_job(&format!("job-{i:02}"), PRIORITY_NORMAL, now))
                .await
                .unwrap();
        }

        let claim_all = |agent: &'static str| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next(agent, now).await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            })
        };

        let (one, two) = tokio::join!(claim_all("agent-1"), claim_all("agent-2"));
        let one = one.unwrap();
        let two = two.unwrap();

        assert_eq!(one.len() + two.len(), 40);
        for id in &one {
            assert!(!two.contains(id), "job {id} assigned to both agents");
        }
    }

    #[tokio::test]
    async fn test_take_running_is_idempotent() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_agent(make_agent("agent-1", 1, now)).await.unwrap();
        store.enqueue(make_job("a", PRIORITY_NORMAL, now)).await.unwrap();
        store.claim_next("agent-1", now).await.unwrap().unwrap();

        assert!(store.take_running("a").await.unwrap().is_some());
        assert!(store.take_running("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_outcome_auto_pauses_after_threshold() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut agent = make_agent("agent-1", 2, now);
        agent.pause_after_consecutive_failures = 3;
        store.upsert_agent(agent).await.unwrap();

        for _ in 0..2 {
            let status = store
                .record_outcome("agent-1", BuildStatus::Failed, 10, now)
                .await
                .unwrap();
            assert_eq!(status, AgentStatus::Active);
        }
        let status = store
            .record_outcome("agent-1", BuildStatus::Failed, 10, now)
            .await
            .unwrap();
        assert_eq!(status, AgentStatus::SelfPaused);
    }

    #[tokio::test]
    async fn test_record_outcome_success_resets_failure_streak() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut agent = make_agent("agent-1", 2, now);
        agent.pause_after_consecutive_failures = 3;
        store.upsert_agent(agent).await.unwrap();

        store.record_outcome("agent-1", BuildStatus::Failed, 10, now).await.unwrap();
        store.record_outcome("agent-1", BuildStatus::Failed, 10, now).await.unwrap();
        store
            .record_outcome("agent-1", BuildStatus::Successful, 10, now)
            .await
            .unwrap();

        let info = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(info.consecutive_failures, 0);
        assert_eq!(info.status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_evict_returns_orphaned_running_jobs() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_agent(make_agent("agent-1", 2, now)).await.unwrap();
        store
            .upsert_agent(make_agent("agent-2", 2, now + Duration::seconds(60)))
            .await
            .unwrap();
        store.enqueue(make_job("a", PRIORITY_NORMAL, now)).await.unwrap();
        store.claim_next("agent-1", now).await.unwrap().unwrap();

        let evicted = store
            .evict_agents_stale_since(now + Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(evicted.len(), 1);
        let (agent, jobs) = &evicted[0];
        assert_eq!(agent.name, "agent-1");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "a");
        assert!(store.get_agent("agent-1").await.unwrap().is_none());
        assert!(store.running_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_preserves_stats_and_pause_state() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut agent = make_agent("agent-1", 2, now);
        agent.pause_after_consecutive_failures = 1;
        store.upsert_agent(agent.clone()).await.unwrap();
        store.record_outcome("agent-1", BuildStatus::Failed, 5, now).await.unwrap();

        // Re-registration with a new capacity must not clear the pause, but
        // the restarted process brings a fresh start date
        let restarted_at = now + Duration::seconds(600);
        agent.max_concurrent_builds = 4;
        agent.stats = AgentStats::new(restarted_at, None);
        agent.last_heartbeat_at = restarted_at;
        store.upsert_agent(agent).await.unwrap();

        let info = store.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(info.max_concurrent_builds, 4);
        assert_eq!(info.status, AgentStatus::SelfPaused);
        assert_eq!(info.stats.failed_builds, 1);
        assert_eq!(info.stats.start_date, restarted_at);
    }

    #[tokio::test]
    async fn test_statistics_filters_by_exercise() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let job = make_job("a", PRIORITY_NORMAL, now);
        let mut record = crucible_core::domain::job::FinishedBuildJob::from_job(
            &job.started_on(make_agent("agent-1", 1, now).agent, now),
            BuildStatus::Successful,
            now + Duration::seconds(20),
            None,
        );
        store.append_finished(record.clone()).await.unwrap();
        record.id = "b".to_string();
        record.exercise_id = 99;
        record.status = BuildStatus::Failed;
        store.append_finished(record).await.unwrap();

        let all = store.statistics(&StatisticsFilter::default()).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.average_build_duration_secs, 20);

        let filtered = store
            .statistics(&StatisticsFilter {
                exercise_id: Some(99),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.failed, 1);
    }
}
