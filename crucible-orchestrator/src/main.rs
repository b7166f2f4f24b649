use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod executor;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
mod testutil;

use clock::SystemClock;
use executor::LocalExecutor;
use scheduler::{Scheduler, SchedulerConfig};
use store::postgres::PgQueueStore;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crucible_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Crucible Orchestrator...");

    let config = config::Config::from_env();

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let store = PgQueueStore::new(pool);

    // Scheduler loop: claims pending jobs for agents with spare capacity
    let scheduler = Scheduler::new(
        store.clone(),
        SystemClock,
        LocalExecutor::new(store.clone()),
        SchedulerConfig {
            interval: config.scheduler_interval,
            dispatch_retry_ceiling: config.job_retry_ceiling,
        },
    );
    tokio::spawn(scheduler.run());

    // Liveness sweeper: evicts silent agents and re-queues their jobs
    {
        let store = store.clone();
        let sweep_interval = config.liveness_sweep_interval;
        let window = chrono::Duration::from_std(config.liveness_window)
            .expect("liveness window out of range");
        let retry_ceiling = config.job_retry_ceiling;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now = chrono::Utc::now();
                if let Err(err) =
                    service::agent::evict_stale_agents(&store, window, retry_ceiling, now).await
                {
                    tracing::error!("Liveness sweep failed: {:?}", err);
                }
            }
        });
    }

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        store,
        result_retry_ceiling: config.job_retry_ceiling,
        default_pause_threshold: config.default_pause_threshold,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
