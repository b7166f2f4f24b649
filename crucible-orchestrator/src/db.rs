use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Live queue: pending and running jobs, distinguished by state
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_jobs (
            id VARCHAR(255) PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            participation_id BIGINT NOT NULL,
            course_id BIGINT NOT NULL,
            exercise_id BIGINT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL,
            state VARCHAR(20) NOT NULL,
            agent_name VARCHAR(255),
            agent_address VARCHAR(255),
            agent_display_name VARCHAR(255),
            submission_date TIMESTAMPTZ NOT NULL,
            build_start_date TIMESTAMPTZ,
            estimated_completion_date TIMESTAMPTZ,
            estimated_duration_secs BIGINT NOT NULL DEFAULT 0,
            repository_info JSONB NOT NULL,
            build_config JSONB NOT NULL,
            cancellation_requested BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ordered scan of the pending set is the scheduler hot path
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_jobs_pending_order \
         ON build_jobs(state, priority, submission_date, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_build_jobs_agent ON build_jobs(agent_name)")
        .execute(pool)
        .await?;

    // Agent registry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_agents (
            name VARCHAR(255) PRIMARY KEY,
            member_address VARCHAR(255) NOT NULL,
            display_name VARCHAR(255) NOT NULL,
            max_concurrent_builds INTEGER NOT NULL,
            status VARCHAR(20) NOT NULL,
            public_key_fingerprint TEXT,
            pause_after_consecutive_failures INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            successful_builds BIGINT NOT NULL DEFAULT 0,
            failed_builds BIGINT NOT NULL DEFAULT 0,
            cancelled_builds BIGINT NOT NULL DEFAULT 0,
            timed_out_builds BIGINT NOT NULL DEFAULT 0,
            total_builds BIGINT NOT NULL DEFAULT 0,
            total_build_duration_secs BIGINT NOT NULL DEFAULT 0,
            last_build_date TIMESTAMPTZ,
            start_date TIMESTAMPTZ NOT NULL,
            build_image_revision TEXT,
            registered_at TIMESTAMPTZ NOT NULL,
            last_heartbeat_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_agents_heartbeat \
         ON build_agents(last_heartbeat_at)",
    )
    .execute(pool)
    .await?;

    // Append-only history of terminal jobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS finished_build_jobs (
            id VARCHAR(255) PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            participation_id BIGINT NOT NULL,
            course_id BIGINT NOT NULL,
            exercise_id BIGINT NOT NULL,
            retry_count INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            status VARCHAR(20) NOT NULL,
            build_agent_address VARCHAR(255) NOT NULL DEFAULT '',
            commit_hash VARCHAR(255),
            submission_date TIMESTAMPTZ NOT NULL,
            build_start_date TIMESTAMPTZ,
            build_completion_date TIMESTAMPTZ,
            estimated_completion_date TIMESTAMPTZ,
            estimated_duration_secs BIGINT NOT NULL DEFAULT 0,
            result JSONB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_finished_build_jobs_exercise \
         ON finished_build_jobs(course_id, exercise_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_finished_build_jobs_completed \
         ON finished_build_jobs(build_completion_date)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
