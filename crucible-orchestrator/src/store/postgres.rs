//! Postgres queue store
//!
//! Production [`QueueStore`] backed by Postgres. The pop-and-assign in
//! [`claim_next`](PgQueueStore::claim_next) runs in one transaction: the agent
//! row is locked with `FOR UPDATE` (so concurrent schedulers serialize per
//! agent and the capacity check stays accurate) and the pending row with
//! `FOR UPDATE SKIP LOCKED` (so two nodes racing on the queue head pick
//! different jobs instead of blocking). No operation spans more than one
//! entry group.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crucible_core::domain::agent::{AgentInfo, AgentRef, AgentStats, AgentStatus};
use crucible_core::domain::job::{BuildJob, BuildStatus, FinishedBuildJob, JobTimingInfo};
use crucible_core::dto::stats::{QueueStatistics, StatisticsFilter};

use super::{QueueStore, StoreError};

const STATE_PENDING: &str = "pending";
const STATE_RUNNING: &str = "running";

const JOB_COLUMNS: &str = "id, name, participation_id, course_id, exercise_id, retry_count, \
     priority, state, agent_name, agent_address, agent_display_name, submission_date, \
     build_start_date, estimated_completion_date, estimated_duration_secs, repository_info, \
     build_config";

/// Postgres-backed store; cheap to clone (shares the pool).
#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn enqueue(&self, job: BuildJob) -> Result<(), StoreError> {
        let (finished_exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM finished_build_jobs WHERE id = $1)")
                .bind(&job.id)
                .fetch_one(&self.pool)
                .await?;
        if finished_exists {
            return Err(StoreError::DuplicateJob(job.id));
        }

        let result = insert_job(&self.pool, &job, STATE_PENDING, true).await?;
        if result == 0 {
            return Err(StoreError::DuplicateJob(job.id));
        }
        Ok(())
    }

    async fn requeue(&self, job: BuildJob) -> Result<(), StoreError> {
        insert_job(&self.pool, &job, STATE_PENDING, false).await?;
        Ok(())
    }

    async fn claim_next(
        &self,
        agent_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BuildJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let agent: Option<(String, String, String, i32, String)> = sqlx::query_as(
            "SELECT name, member_address, display_name, max_concurrent_builds, status \
             FROM build_agents WHERE name = $1 FOR UPDATE",
        )
        .bind(agent_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((name, member_address, display_name, max_concurrent, status)) = agent else {
            return Err(StoreError::AgentNotFound(agent_name.to_string()));
        };
        if string_to_agent_status(&status) != AgentStatus::Active {
            return Ok(None);
        }

        let (running_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM build_jobs WHERE state = $1 AND agent_name = $2",
        )
        .bind(STATE_RUNNING)
        .bind(agent_name)
        .fetch_one(&mut *tx)
        .await?;
        if running_count >= max_concurrent as i64 {
            return Ok(None);
        }

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE state = $1 \
             ORDER BY priority, submission_date, id LIMIT 1 FOR UPDATE SKIP LOCKED",
        ))
        .bind(STATE_PENDING)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let job = row.into_job()?;

        let agent_ref = AgentRef {
            name,
            member_address,
            display_name,
        };
        let started = job.started_on(agent_ref, now);

        sqlx::query(
            "UPDATE build_jobs SET state = $1, agent_name = $2, agent_address = $3, \
             agent_display_name = $4, build_start_date = $5, estimated_completion_date = $6 \
             WHERE id = $7",
        )
        .bind(STATE_RUNNING)
        .bind(agent_name)
        .bind(
            started
                .build_agent
                .as_ref()
                .map(|agent| agent.member_address.clone()),
        )
        .bind(
            started
                .build_agent
                .as_ref()
                .map(|agent| agent.display_name.clone()),
        )
        .bind(started.timing.build_start_date)
        .bind(started.timing.estimated_completion_date)
        .bind(&started.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(started))
    }

    async fn remove_pending(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "DELETE FROM build_jobs WHERE id = $1 AND state = $2 RETURNING {JOB_COLUMNS}",
        ))
        .bind(job_id)
        .bind(STATE_PENDING)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn take_running(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "DELETE FROM build_jobs WHERE id = $1 AND state = $2 RETURNING {JOB_COLUMNS}",
        ))
        .bind(job_id)
        .bind(STATE_RUNNING)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<BuildJob>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM build_jobs WHERE id = $1"))
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn pending_jobs(&self) -> Result<Vec<BuildJob>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE state = $1 \
             ORDER BY priority, submission_date, id",
        ))
        .bind(STATE_PENDING)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn running_jobs(&self) -> Result<Vec<BuildJob>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE state = $1 ORDER BY build_start_date",
        ))
        .bind(STATE_RUNNING)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn running_jobs_for_agent(
        &self,
        agent_name: &str,
    ) -> Result<Vec<BuildJob>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE state = $1 AND agent_name = $2 \
             ORDER BY build_start_date",
        ))
        .bind(STATE_RUNNING)
        .bind(agent_name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn request_cancellation(&self, job_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE build_jobs SET cancellation_requested = TRUE WHERE id = $1 AND state = $2",
        )
        .bind(job_id)
        .bind(STATE_RUNNING)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancellation_requested(&self, job_id: &str) -> Result<bool, StoreError> {
        let flagged: Option<(bool,)> =
            sqlx::query_as("SELECT cancellation_requested FROM build_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flagged.is_some_and(|(requested,)| requested))
    }

    async fn upsert_agent(&self, info: AgentInfo) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO build_agents (name, member_address, display_name, max_concurrent_builds,
                status, public_key_fingerprint, pause_after_consecutive_failures,
                consecutive_failures, start_date, build_image_revision, registered_at,
                last_heartbeat_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (name) DO UPDATE SET
                member_address = EXCLUDED.member_address,
                display_name = EXCLUDED.display_name,
                max_concurrent_builds = EXCLUDED.max_concurrent_builds,
                public_key_fingerprint = EXCLUDED.public_key_fingerprint,
                pause_after_consecutive_failures = EXCLUDED.pause_after_consecutive_failures,
                start_date = EXCLUDED.start_date,
                build_image_revision = EXCLUDED.build_image_revision,
                last_heartbeat_at = EXCLUDED.last_heartbeat_at
            "#,
        )
        .bind(&info.agent.name)
        .bind(&info.agent.member_address)
        .bind(&info.agent.display_name)
        .bind(info.max_concurrent_builds as i32)
        .bind(agent_status_to_string(info.status))
        .bind(&info.public_key_fingerprint)
        .bind(info.pause_after_consecutive_failures as i32)
        .bind(info.consecutive_failures as i32)
        .bind(info.stats.start_date)
        .bind(&info.stats.build_image_revision)
        .bind(info.registered_at)
        .bind(info.last_heartbeat_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_agent(&self, name: &str) -> Result<Option<AgentInfo>, StoreError> {
        let row: Option<AgentRow> = sqlx::query_as(&format!(
            "SELECT {AGENT_COLUMNS} FROM build_agents a WHERE a.name = $1",
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AgentInfo::from))
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, StoreError> {
        let rows: Vec<AgentRow> = sqlx::query_as(&format!(
            "SELECT {AGENT_COLUMNS} FROM build_agents a ORDER BY a.name",
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AgentInfo::from).collect())
    }

    async fn heartbeat(&self, name: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE build_agents SET last_heartbeat_at = $1 WHERE name = $2")
            .bind(now)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_capacity(
        &self,
        name: &str,
        max_concurrent_builds: u32,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE build_agents SET max_concurrent_builds = $1 WHERE name = $2")
                .bind(max_concurrent_builds as i32)
                .bind(name)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn set_agent_status(
        &self,
        name: &str,
        status: AgentStatus,
        reset_consecutive_failures: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE build_agents SET status = $1, \
             consecutive_failures = CASE WHEN $2 THEN 0 ELSE consecutive_failures END \
             WHERE name = $3",
        )
        .bind(agent_status_to_string(status))
        .bind(reset_consecutive_failures)
        .bind(name)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AgentNotFound(name.to_string()));
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
        let mut tx = self.pool.begin().await?;

        let row: Option<(i32, i32, String)> = sqlx::query_as(
            "SELECT pause_after_consecutive_failures, consecutive_failures, status \
             FROM build_agents WHERE name = $1 FOR UPDATE",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((threshold, consecutive, current_status)) = row else {
            return Err(StoreError::AgentNotFound(name.to_string()));
        };

        let consecutive = match status {
            BuildStatus::Successful => 0,
            BuildStatus::Failed | BuildStatus::Error | BuildStatus::Timeout => consecutive + 1,
            BuildStatus::Cancelled => consecutive,
        };
        let mut agent_status = string_to_agent_status(&current_status);
        if threshold > 0 && consecutive >= threshold && agent_status == AgentStatus::Active {
            agent_status = AgentStatus::SelfPaused;
        }

        let status_str = build_status_to_string(status);
        sqlx::query(
            r#"
            UPDATE build_agents SET
                successful_builds = successful_builds + CASE WHEN $1 = 'SUCCESSFUL' THEN 1 ELSE 0 END,
                failed_builds = failed_builds + CASE WHEN $1 IN ('FAILED', 'ERROR') THEN 1 ELSE 0 END,
                cancelled_builds = cancelled_builds + CASE WHEN $1 = 'CANCELLED' THEN 1 ELSE 0 END,
                timed_out_builds = timed_out_builds + CASE WHEN $1 = 'TIMEOUT' THEN 1 ELSE 0 END,
                total_builds = total_builds + 1,
                total_build_duration_secs = total_build_duration_secs + $2,
                last_build_date = $3,
                consecutive_failures = $4,
                status = $5
            WHERE name = $6
            "#,
        )
        .bind(status_str)
        .bind(duration_secs.max(0))
        .bind(now)
        .bind(consecutive)
        .bind(agent_status_to_string(agent_status))
        .bind(name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(agent_status)
    }

    async fn evict_agents_stale_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(AgentRef, Vec<BuildJob>)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let stale: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT name, member_address, display_name FROM build_agents \
             WHERE last_heartbeat_at < $1 FOR UPDATE",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut evicted = Vec::new();
        for (name, member_address, display_name) in stale {
            let rows: Vec<JobRow> = sqlx::query_as(&format!(
                "DELETE FROM build_jobs WHERE state = $1 AND agent_name = $2 \
                 RETURNING {JOB_COLUMNS}",
            ))
            .bind(STATE_RUNNING)
            .bind(&name)
            .fetch_all(&mut *tx)
            .await?;
            let orphaned: Vec<BuildJob> = rows
                .into_iter()
                .map(JobRow::into_job)
                .collect::<Result<_, _>>()?;

            sqlx::query("DELETE FROM build_agents WHERE name = $1")
                .bind(&name)
                .execute(&mut *tx)
                .await?;

            evicted.push((
                AgentRef {
                    name,
                    member_address,
                    display_name,
                },
                orphaned,
            ));
        }

        tx.commit().await?;
        Ok(evicted)
    }

    async fn append_finished(&self, record: FinishedBuildJob) -> Result<(), StoreError> {
        let result = serde_json::to_value(&record.result)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO finished_build_jobs (id, name, participation_id, course_id, exercise_id,
                retry_count, priority, status, build_agent_address, commit_hash, submission_date,
                build_start_date, build_completion_date, estimated_completion_date,
                estimated_duration_secs, result)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.participation_id)
        .bind(record.course_id)
        .bind(record.exercise_id)
        .bind(record.retry_count as i32)
        .bind(record.priority)
        .bind(build_status_to_string(record.status))
        .bind(&record.build_agent_address)
        .bind(&record.commit_hash)
        .bind(record.timing.submission_date)
        .bind(record.timing.build_start_date)
        .bind(record.timing.build_completion_date)
        .bind(record.timing.estimated_completion_date)
        .bind(record.timing.estimated_duration_secs)
        .bind(result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_finished(&self, job_id: &str) -> Result<Option<FinishedBuildJob>, StoreError> {
        let row: Option<FinishedRow> = sqlx::query_as(
            "SELECT id, name, participation_id, course_id, exercise_id, retry_count, priority, \
             status, build_agent_address, commit_hash, submission_date, build_start_date, \
             build_completion_date, estimated_completion_date, estimated_duration_secs, result \
             FROM finished_build_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FinishedRow::into_record).transpose()
    }

    async fn statistics(
        &self,
        filter: &StatisticsFilter,
    ) -> Result<QueueStatistics, StoreError> {
        let rows: Vec<(String, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT status, build_start_date, build_completion_date FROM finished_build_jobs \
             WHERE ($1::BIGINT IS NULL OR course_id = $1) \
               AND ($2::BIGINT IS NULL OR exercise_id = $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR build_completion_date >= $3) \
               AND ($4::TIMESTAMPTZ IS NULL OR build_completion_date <= $4)",
        )
        .bind(filter.course_id)
        .bind(filter.exercise_id)
        .bind(filter.since)
        .bind(filter.until)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStatistics::default();
        let mut measured_builds = 0u64;
        let mut total_duration_secs = 0i64;
        for (status, start, completion) in rows {
            stats.total += 1;
            match string_to_build_status(&status) {
                BuildStatus::Successful => stats.successful += 1,
                BuildStatus::Failed => stats.failed += 1,
                BuildStatus::Cancelled => stats.cancelled += 1,
                BuildStatus::Error => stats.errored += 1,
                BuildStatus::Timeout => stats.timed_out += 1,
            }
            if let (Some(start), Some(end)) = (start, completion) {
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

async fn insert_job(
    pool: &PgPool,
    job: &BuildJob,
    state: &str,
    fail_on_conflict: bool,
) -> Result<u64, StoreError> {
    let repository_info = serde_json::to_value(&job.repository_info)
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
    let build_config = serde_json::to_value(&job.build_config)
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;

    let conflict_clause = if fail_on_conflict {
        "ON CONFLICT (id) DO NOTHING"
    } else {
        // Re-queue replaces whatever row is left for this id
        "ON CONFLICT (id) DO UPDATE SET state = EXCLUDED.state, \
         retry_count = EXCLUDED.retry_count, agent_name = NULL, agent_address = NULL, \
         agent_display_name = NULL, build_start_date = NULL, \
         estimated_completion_date = NULL, cancellation_requested = FALSE"
    };

    let result = sqlx::query(&format!(
        r#"
        INSERT INTO build_jobs (id, name, participation_id, course_id, exercise_id, retry_count,
            priority, state, agent_name, agent_address, agent_display_name, submission_date,
            build_start_date, estimated_completion_date, estimated_duration_secs,
            repository_info, build_config)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        {conflict_clause}
        "#,
    ))
    .bind(&job.id)
    .bind(&job.name)
    .bind(job.participation_id)
    .bind(job.course_id)
    .bind(job.exercise_id)
    .bind(job.retry_count as i32)
    .bind(job.priority)
    .bind(state)
    .bind(job.build_agent.as_ref().map(|agent| agent.name.clone()))
    .bind(job.build_agent.as_ref().map(|agent| agent.member_address.clone()))
    .bind(job.build_agent.as_ref().map(|agent| agent.display_name.clone()))
    .bind(job.timing.submission_date)
    .bind(job.timing.build_start_date)
    .bind(job.timing.estimated_completion_date)
    .bind(job.timing.estimated_duration_secs)
    .bind(repository_info)
    .bind(build_config)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Status Mapping
// =============================================================================

fn build_status_to_string(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Successful => "SUCCESSFUL",
        BuildStatus::Failed => "FAILED",
        BuildStatus::Cancelled => "CANCELLED",
        BuildStatus::Error => "ERROR",
        BuildStatus::Timeout => "TIMEOUT",
    }
}

fn string_to_build_status(s: &str) -> BuildStatus {
    match s {
        "SUCCESSFUL" => BuildStatus::Successful,
        "FAILED" => BuildStatus::Failed,
        "CANCELLED" => BuildStatus::Cancelled,
        "TIMEOUT" => BuildStatus::Timeout,
        _ => BuildStatus::Error,
    }
}

fn agent_status_to_string(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Active => "ACTIVE",
        AgentStatus::Paused => "PAUSED",
        AgentStatus::SelfPaused => "SELF_PAUSED",
    }
}

fn string_to_agent_status(s: &str) -> AgentStatus {
    match s {
        "ACTIVE" => AgentStatus::Active,
        "SELF_PAUSED" => AgentStatus::SelfPaused,
        _ => AgentStatus::Paused,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

const AGENT_COLUMNS: &str = "a.name, a.member_address, a.display_name, a.max_concurrent_builds, \
     a.status, a.public_key_fingerprint, a.pause_after_consecutive_failures, \
     a.consecutive_failures, a.successful_builds, a.failed_builds, a.cancelled_builds, \
     a.timed_out_builds, a.total_builds, a.total_build_duration_secs, a.last_build_date, \
     a.start_date, a.build_image_revision, a.registered_at, a.last_heartbeat_at, \
     (SELECT COUNT(*) FROM build_jobs j WHERE j.state = 'running' AND j.agent_name = a.name) \
         AS current_builds";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    participation_id: i64,
    course_id: i64,
    exercise_id: i64,
    retry_count: i32,
    priority: i32,
    #[allow(dead_code)]
    state: String,
    agent_name: Option<String>,
    agent_address: Option<String>,
    agent_display_name: Option<String>,
    submission_date: DateTime<Utc>,
    build_start_date: Option<DateTime<Utc>>,
    estimated_completion_date: Option<DateTime<Utc>>,
    estimated_duration_secs: i64,
    repository_info: serde_json::Value,
    build_config: serde_json::Value,
}

impl JobRow {
    fn into_job(self) -> Result<BuildJob, StoreError> {
        let repository_info = serde_json::from_value(self.repository_info)
            .map_err(|err| StoreError::Unavailable(format!("corrupt repository_info: {err}")))?;
        let build_config = serde_json::from_value(self.build_config)
            .map_err(|err| StoreError::Unavailable(format!("corrupt build_config: {err}")))?;

        let build_agent = self.agent_name.map(|name| AgentRef {
            name,
            member_address: self.agent_address.unwrap_or_default(),
            display_name: self.agent_display_name.unwrap_or_default(),
        });

        Ok(BuildJob {
            id: self.id,
            name: self.name,
            participation_id: self.participation_id,
            course_id: self.course_id,
            exercise_id: self.exercise_id,
            retry_count: self.retry_count.max(0) as u32,
            priority: self.priority,
            status: None,
            build_agent,
            repository_info,
            timing: JobTimingInfo {
                submission_date: self.submission_date,
                build_start_date: self.build_start_date,
                build_completion_date: None,
                estimated_completion_date: self.estimated_completion_date,
                estimated_duration_secs: self.estimated_duration_secs,
            },
            build_config,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    name: String,
    member_address: String,
    display_name: String,
    max_concurrent_builds: i32,
    status: String,
    public_key_fingerprint: Option<String>,
    pause_after_consecutive_failures: i32,
    consecutive_failures: i32,
    successful_builds: i64,
    failed_builds: i64,
    cancelled_builds: i64,
    timed_out_builds: i64,
    total_builds: i64,
    total_build_duration_secs: i64,
    last_build_date: Option<DateTime<Utc>>,
    start_date: DateTime<Utc>,
    build_image_revision: Option<String>,
    registered_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    current_builds: i64,
}

impl From<AgentRow> for AgentInfo {
    fn from(row: AgentRow) -> Self {
        AgentInfo {
            agent: AgentRef {
                name: row.name,
                member_address: row.member_address,
                display_name: row.display_name,
            },
            max_concurrent_builds: row.max_concurrent_builds.max(0) as u32,
            current_builds: row.current_builds.max(0) as u32,
            status: string_to_agent_status(&row.status),
            public_key_fingerprint: row.public_key_fingerprint,
            pause_after_consecutive_failures: row.pause_after_consecutive_failures.max(0) as u32,
            consecutive_failures: row.consecutive_failures.max(0) as u32,
            stats: AgentStats {
                successful_builds: row.successful_builds.max(0) as u64,
                failed_builds: row.failed_builds.max(0) as u64,
                cancelled_builds: row.cancelled_builds.max(0) as u64,
                timed_out_builds: row.timed_out_builds.max(0) as u64,
                total_builds: row.total_builds.max(0) as u64,
                total_build_duration_secs: row.total_build_duration_secs,
                last_build_date: row.last_build_date,
                start_date: row.start_date,
                build_image_revision: row.build_image_revision,
            },
            registered_at: row.registered_at,
            last_heartbeat_at: row.last_heartbeat_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FinishedRow {
    id: String,
    name: String,
    participation_id: i64,
    course_id: i64,
    exercise_id: i64,
    retry_count: i32,
    priority: i32,
    status: String,
    build_agent_address: String,
    commit_hash: Option<String>,
    submission_date: DateTime<Utc>,
    build_start_date: Option<DateTime<Utc>>,
    build_completion_date: Option<DateTime<Utc>>,
    estimated_completion_date: Option<DateTime<Utc>>,
    estimated_duration_secs: i64,
    result: Option<serde_json::Value>,
}

impl FinishedRow {
    fn into_record(self) -> Result<FinishedBuildJob, StoreError> {
        let result = match self.result {
            Some(value) => serde_json::from_value(value)
                .map_err(|err| StoreError::Unavailable(format!("corrupt result: {err}")))?,
            None => None,
        };
        Ok(FinishedBuildJob {
            id: self.id,
            name: self.name,
            participation_id: self.participation_id,
            course_id: self.course_id,
            exercise_id: self.exercise_id,
            retry_count: self.retry_count.max(0) as u32,
            priority: self.priority,
            status: string_to_build_status(&self.status),
            build_agent_address: self.build_agent_address,
            commit_hash: self.commit_hash,
            timing: JobTimingInfo {
                submission_date: self.submission_date,
                build_start_date: self.build_start_date,
                build_completion_date: self.build_completion_date,
                estimated_completion_date: self.estimated_completion_date,
                estimated_duration_secs: self.estimated_duration_secs,
            },
            result,
        })
    }
}
