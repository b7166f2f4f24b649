//! Agent Service
//!
//! Business logic for the agent registry: registration, heartbeats, capacity
//! and pause management, and liveness eviction.

use chrono::{DateTime, Duration, Utc};

use crucible_core::domain::agent::{AgentInfo, AgentStats, AgentStatus};
use crucible_core::dto::agent::{CapacityUpdate, FailureThresholdUpdate, RegisterAgent};

use crate::service::result;
use crate::store::{QueueStore, StoreError};

/// Service error type
#[derive(Debug)]
pub enum AgentError {
    NotFound(String),
    ValidationError(String),
    StoreError(StoreError),
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AgentNotFound(name) => AgentError::NotFound(name),
            other => AgentError::StoreError(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Register an agent with the orchestrator.
///
/// Re-registration (e.g. after an agent restart) refreshes identity, capacity
/// and heartbeat while the rolling statistics and pause state of the existing
/// entry survive.
pub async fn register_agent<S: QueueStore>(
    store: &S,
    req: RegisterAgent,
    default_pause_threshold: u32,
    now: DateTime<Utc>,
) -> Result<AgentInfo> {
    validate_register_request(&req)?;

    let name = req.agent.name.clone();
    let info = AgentInfo {
        agent: req.agent,
        max_concurrent_builds: req.max_concurrent_builds,
        current_builds: 0,
        status: AgentStatus::Active,
        public_key_fingerprint: req.public_key_fingerprint,
        pause_after_consecutive_failures: req
            .pause_after_consecutive_failures
            .unwrap_or(default_pause_threshold),
        consecutive_failures: 0,
        stats: AgentStats::new(now, req.build_image_revision),
        registered_at: now,
        last_heartbeat_at: now,
    };
    store.upsert_agent(info).await?;

    tracing::info!("Agent registered: {}", name);

    let registered = store
        .get_agent(&name)
        .await?
        .ok_or(AgentError::NotFound(name))?;
    Ok(registered)
}

/// Update the heartbeat of an agent.
///
/// Keeps the agent from being evicted by the liveness sweeper; agents call
/// this periodically.
pub async fn update_heartbeat<S: QueueStore>(
    store: &S,
    name: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let updated = store.heartbeat(name, now).await?;
    if !updated {
        return Err(AgentError::NotFound(name.to_string()));
    }
    tracing::debug!("Heartbeat received from agent: {}", name);
    Ok(())
}

/// Get an agent by name.
pub async fn get_agent<S: QueueStore>(store: &S, name: &str) -> Result<AgentInfo> {
    let info = store
        .get_agent(name)
        .await?
        .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
    Ok(info)
}

/// List all agents.
pub async fn list_agents<S: QueueStore>(store: &S) -> Result<Vec<AgentInfo>> {
    Ok(store.list_agents().await?)
}

/// Change an agent's capacity ceiling.
///
/// Values <= 0 are rejected before any state change. Lowering the ceiling
/// never preempts: jobs already running finish normally and the agent simply
/// claims nothing new until it drops below the new ceiling.
pub async fn set_capacity<S: QueueStore>(
    store: &S,
    name: &str,
    update: CapacityUpdate,
) -> Result<()> {
    if update.max_concurrent_builds <= 0 {
        return Err(AgentError::ValidationError(format!(
            "Capacity must be at least 1, got {}",
            update.max_concurrent_builds
        )));
    }
    store
        .set_capacity(name, update.max_concurrent_builds as u32)
        .await?;
    tracing::info!(
        "Capacity of agent {} set to {}",
        name,
        update.max_concurrent_builds
    );
    Ok(())
}

/// Change an agent's auto-pause threshold. 0 disables auto-pause.
pub async fn set_failure_threshold<S: QueueStore>(
    store: &S,
    name: &str,
    update: FailureThresholdUpdate,
) -> Result<()> {
    let mut info = get_agent(store, name).await?;
    info.pause_after_consecutive_failures = update.pause_after_consecutive_failures;
    store.upsert_agent(info).await?;
    tracing::info!(
        "Auto-pause threshold of agent {} set to {}",
        name,
        update.pause_after_consecutive_failures
    );
    Ok(())
}

/// Pause an agent. Running jobs finish normally; nothing new is assigned.
pub async fn pause_agent<S: QueueStore>(store: &S, name: &str) -> Result<()> {
    store
        .set_agent_status(name, AgentStatus::Paused, false)
        .await?;
    tracing::info!("Agent {} paused", name);
    Ok(())
}

/// Resume a paused or self-paused agent. Resets the consecutive-failure
/// counter so the agent does not immediately pause itself again.
pub async fn resume_agent<S: QueueStore>(store: &S, name: &str) -> Result<()> {
    store
        .set_agent_status(name, AgentStatus::Active, true)
        .await?;
    tracing::info!("Agent {} resumed", name);
    Ok(())
}

/// Evict agents whose last heartbeat is older than `liveness_window` and
/// re-queue their orphaned jobs as infrastructure failures.
///
/// Called periodically by the liveness sweeper. Returns the number of agents
/// evicted.
pub async fn evict_stale_agents<S: QueueStore>(
    store: &S,
    liveness_window: Duration,
    retry_ceiling: u32,
    now: DateTime<Utc>,
) -> Result<usize> {
    let cutoff = now - liveness_window;
    let evicted = store.evict_agents_stale_since(cutoff).await?;

    for (agent, orphans) in &evicted {
        tracing::warn!(
            "Agent {} evicted after missed heartbeats, re-queueing {} job(s)",
            agent.name,
            orphans.len()
        );
        for job in orphans {
            let reason = format!("agent {} evicted after missed heartbeats", agent.name);
            result::requeue_orphan(store, job.clone(), &reason, retry_ceiling, now)
                .await
                .map_err(|err| match err {
                    result::ResultError::StoreError(err) => AgentError::from(err),
                    result::ResultError::StaleNotice(id) => {
                        AgentError::ValidationError(format!("job {id} vanished during eviction"))
                    }
                })?;
        }
    }

    Ok(evicted.len())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_register_request(req: &RegisterAgent) -> Result<()> {
    let name = &req.agent.name;
    if name.is_empty() || name.len() > 255 {
        return Err(AgentError::ValidationError(
            "Agent name must be 1-255 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AgentError::ValidationError(
            "Agent name may only contain lowercase letters, digits and hyphens".to_string(),
        ));
    }
    if req.max_concurrent_builds == 0 {
        return Err(AgentError::ValidationError(
            "Capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::{make_agent, make_job};
    use crucible_core::domain::agent::AgentRef;
    use crucible_core::domain::job::{BuildStatus, PRIORITY_NORMAL};

    fn register_request(name: &str) -> RegisterAgent {
        RegisterAgent {
            agent: AgentRef {
                name: name.to_string(),
                member_address: "10.0.0.5:7921".to_string(),
                display_name: "Agent".to_string(),
            },
            max_concurrent_builds: 2,
            public_key_fingerprint: None,
            build_image_revision: None,
            pause_after_consecutive_failures: None,
        }
    }

    #[tokio::test]
    async fn test_register_applies_default_threshold() {
        let store = MemoryStore::new();
        let info = register_agent(&store, register_request("agent-1"), 3, Utc::now())
            .await
            .unwrap();
        assert_eq!(info.pause_after_consecutive_failures, 3);
        assert_eq!(info.status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_names() {
        let store = MemoryStore::new();
        for bad in ["", "Agent-1", "agent_1", "agent 1"] {
            let err = register_agent(&store, register_request(bad), 0, Utc::now())
                .await
                .unwrap_err();
            assert!(matches!(err, AgentError::ValidationError(_)), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_reregistration_preserves_stats_and_pause() {
        let now = Utc::now();
        let store = MemoryStore::new();
        register_agent(&store, register_request("agent-1"), 0, now)
            .await
            .unwrap();
        store
            .record_outcome("agent-1", BuildStatus::Successful, 10, now)
            .await
            .unwrap();
        pause_agent(&store, "agent-1").await.unwrap();

        let info = register_agent(&store, register_request("agent-1"), 0, now)
            .await
            .unwrap();
        assert_eq!(info.stats.successful_builds, 1);
        assert_eq!(info.status, AgentStatus::Paused);
    }

    #[tokio::test]
    async fn test_set_capacity_rejects_non_positive_without_change() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.upsert_agent(make_agent("agent-1", 3, now)).await.unwrap();

        for bad in [0, -1] {
            let err = set_capacity(
                &store,
                "agent-1",
                CapacityUpdate {
                    max_concurrent_builds: bad,
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AgentError::ValidationError(_)));
        }
        let info = get_agent(&store, "agent-1").await.unwrap();
        assert_eq!(info.max_concurrent_builds, 3);
    }

    #[tokio::test]
    async fn test_capacity_reduction_never_preempts() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store.upsert_agent(make_agent("agent-1", 3, now)).await.unwrap();
        for i in 0..2 {
            store
                .enqueue(make_job(&format!("job-{i}"), PRIORITY_NORMAL, now))
                .await
                .unwrap();
            store.claim_next("agent-1", now).await.unwrap().unwrap();
        }

        set_capacity(
            &store,
            "agent-1",
            CapacityUpdate {
                max_concurrent_builds: 1,
            },
        )
        .await
        .unwrap();

        // Both jobs keep running above the new ceiling
        assert_eq!(store.running_jobs().await.unwrap().len(), 2);

        // But nothing new is claimed until the agent drops below it
        store
            .enqueue(make_job("job-2", PRIORITY_NORMAL, now))
            .await
            .unwrap();
        assert!(store.claim_next("agent-1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_resets_failure_counter() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let mut agent = make_agent("agent-1", 1, now);
        agent.pause_after_consecutive_failures = 2;
        store.upsert_agent(agent).await.unwrap();

        store
            .record_outcome("agent-1", BuildStatus::Failed, 5, now)
            .await
            .unwrap();
        store
            .record_outcome("agent-1", BuildStatus::Failed, 5, now)
            .await
            .unwrap();
        assert_eq!(
            get_agent(&store, "agent-1").await.unwrap().status,
            AgentStatus::SelfPaused
        );

        resume_agent(&store, "agent-1").await.unwrap();
        let info = get_agent(&store, "agent-1").await.unwrap();
        assert_eq!(info.status, AgentStatus::Active);
        assert_eq!(info.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_eviction_requeues_orphans() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store
            .upsert_agent(make_agent("stale", 2, now - Duration::minutes(10)))
            .await
            .unwrap();
        store
            .enqueue(make_job("job-1", PRIORITY_NORMAL, now))
            .await
            .unwrap();
        store
            .claim_next("stale", now - Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();

        let evicted = evict_stale_agents(&store, Duration::minutes(5), 5, now)
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        assert!(store.get_agent("stale").await.unwrap().is_none());

        let job = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.build_agent.is_none());
    }

    #[tokio::test]
    async fn test_eviction_at_ceiling_errors_orphan() {
        let now = Utc::now();
        let store = MemoryStore::new();
        store
            .upsert_agent(make_agent("stale", 1, now - Duration::minutes(10)))
            .await
            .unwrap();
        let mut job = make_job("job-1", PRIORITY_NORMAL, now);
        job.retry_count = 5;
        store.enqueue(job).await.unwrap();
        store
            .claim_next("stale", now - Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();

        evict_stale_agents(&store, Duration::minutes(5), 5, now)
            .await
            .unwrap();
        let finished = store.find_finished("job-1").await.unwrap().unwrap();
        assert_eq!(finished.status, BuildStatus::Error);
    }
}
