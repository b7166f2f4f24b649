//! Crucible Agent
//!
//! A build agent that registers with the orchestrator, polls for the jobs
//! the scheduler assigned to it, executes their build scripts in child
//! processes, and reports terminal results back.
//!
//! Architecture:
//! - Configuration: settings from environment variables
//! - Poller: assigned-jobs polling, heartbeats, concurrency bound
//! - Executor: script execution with timeout and cooperative cancellation

mod config;
mod executor;
mod poller;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crucible_client::OrchestratorClient;
use crucible_core::domain::agent::AgentRef;
use crucible_core::dto::agent::RegisterAgent;

use crate::config::Config;
use crate::poller::JobPoller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crucible_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Crucible Agent");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: agent_name={}, orchestrator_url={}",
        config.agent_name, config.orchestrator_url
    );

    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));

    info!("Registering with orchestrator");
    register_with_retry(&client, &config).await?;
    info!("Registered successfully");

    let poller = JobPoller::new(config, client);
    poller.run().await;

    Ok(())
}

/// Registers with the orchestrator, retrying while it comes up.
async fn register_with_retry(client: &OrchestratorClient, config: &Config) -> Result<()> {
    const ATTEMPTS: u32 = 10;

    let request = RegisterAgent {
        agent: AgentRef {
            name: config.agent_name.clone(),
            member_address: config.member_address.clone(),
            display_name: config.display_name.clone(),
        },
        max_concurrent_builds: config.max_concurrent_builds,
        public_key_fingerprint: None,
        build_image_revision: config.build_image_revision.clone(),
        pause_after_consecutive_failures: config.pause_after_consecutive_failures,
    };

    for attempt in 1..=ATTEMPTS {
        match client.register_agent(request.clone()).await {
            Ok(info) => {
                info!(
                    "Registered as {} (capacity {})",
                    info.agent.name, info.max_concurrent_builds
                );
                return Ok(());
            }
            Err(err) => {
                warn!(
                    "Registration attempt {}/{} failed: {}",
                    attempt, ATTEMPTS, err
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }

    anyhow::bail!("Could not register with the orchestrator")
}
