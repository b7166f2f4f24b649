//! Agent configuration
//!
//! Defines all configurable parameters for the build agent including
//! polling intervals, capacity, and orchestrator connection settings.

use std::time::Duration;

/// Agent configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique name of this agent (lowercase letters, digits, hyphens)
    pub agent_name: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// Address this agent is reachable under, reported at registration
    pub member_address: String,

    /// Human-readable name shown in listings
    pub display_name: String,

    /// Max builds this agent runs concurrently
    pub max_concurrent_builds: u32,

    /// How often to poll the orchestrator for assigned jobs
    pub poll_interval: Duration,

    /// How often to send heartbeats
    pub heartbeat_interval: Duration,

    /// How often a running build checks for a cancellation request
    pub cancellation_poll_interval: Duration,

    /// Consecutive failures after which the orchestrator pauses this agent;
    /// None defers to the orchestrator default
    pub pause_after_consecutive_failures: Option<u32>,

    /// Revision of the build image this agent runs, if any
    pub build_image_revision: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(agent_name: String, orchestrator_url: String) -> Self {
        Self {
            member_address: format!("{agent_name}:7921"),
            display_name: agent_name.clone(),
            agent_name,
            orchestrator_url,
            max_concurrent_builds: 2,
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            cancellation_poll_interval: Duration::from_secs(2),
            pause_after_consecutive_failures: None,
            build_image_revision: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - AGENT_NAME (required)
    /// - ORCHESTRATOR_URL (required)
    /// - AGENT_ADDRESS (optional, default: "<agent_name>:7921")
    /// - AGENT_DISPLAY_NAME (optional, default: agent name)
    /// - MAX_CONCURRENT_BUILDS (optional, default: 2)
    /// - POLL_INTERVAL (optional, seconds, default: 2)
    /// - HEARTBEAT_INTERVAL (optional, seconds, default: 30)
    /// - CANCELLATION_POLL_INTERVAL (optional, seconds, default: 2)
    /// - PAUSE_AFTER_CONSECUTIVE_FAILURES (optional)
    /// - BUILD_IMAGE_REVISION (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let agent_name = std::env::var("AGENT_NAME")
            .map_err(|_| anyhow::anyhow!("AGENT_NAME environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let mut config = Self::new(agent_name, orchestrator_url);

        if let Ok(address) = std::env::var("AGENT_ADDRESS") {
            config.member_address = address;
        }
        if let Ok(display_name) = std::env::var("AGENT_DISPLAY_NAME") {
            config.display_name = display_name;
        }

        config.max_concurrent_builds = std::env::var("MAX_CONCURRENT_BUILDS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(config.max_concurrent_builds);

        config.poll_interval = env_secs("POLL_INTERVAL", config.poll_interval);
        config.heartbeat_interval = env_secs("HEARTBEAT_INTERVAL", config.heartbeat_interval);
        config.cancellation_poll_interval =
            env_secs("CANCELLATION_POLL_INTERVAL", config.cancellation_poll_interval);

        config.pause_after_consecutive_failures = std::env::var("PAUSE_AFTER_CONSECUTIVE_FAILURES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        config.build_image_revision = std::env::var("BUILD_IMAGE_REVISION").ok();

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_name.is_empty() {
            anyhow::bail!("agent_name cannot be empty");
        }

        if !self
            .agent_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!("agent_name may only contain lowercase letters, digits and hyphens");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.max_concurrent_builds == 0 {
            anyhow::bail!("max_concurrent_builds must be greater than 0");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        Ok(())
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
