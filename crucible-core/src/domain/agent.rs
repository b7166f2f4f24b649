//! Build agent domain model
//!
//! Represents an agent process that executes build jobs dispatched by the
//! orchestrator, together with its capacity, health state and rolling stats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::BuildStatus;

/// Stable identity of one agent process, independent of its current health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    /// Short name, unique across the cluster (lowercase letters, digits, hyphens)
    pub name: String,

    /// Network address the agent is reachable under
    pub member_address: String,

    /// Human-readable name shown in listings
    pub display_name: String,
}

/// Health state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Eligible for new work
    Active,

    /// Paused by an operator; receives no new work
    Paused,

    /// Paused automatically after repeated consecutive failures
    SelfPaused,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "ACTIVE"),
            AgentStatus::Paused => write!(f, "PAUSED"),
            AgentStatus::SelfPaused => write!(f, "SELF_PAUSED"),
        }
    }
}

/// Rolling per-agent build statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub successful_builds: u64,
    pub failed_builds: u64,
    pub cancelled_builds: u64,
    pub timed_out_builds: u64,
    pub total_builds: u64,
    /// Sum of all build durations, for deriving the average
    pub total_build_duration_secs: i64,
    pub last_build_date: Option<DateTime<Utc>>,
    /// When the agent process started
    pub start_date: DateTime<Utc>,
    pub build_image_revision: Option<String>,
}

impl AgentStats {
    pub fn new(start_date: DateTime<Utc>, build_image_revision: Option<String>) -> Self {
        Self {
            successful_builds: 0,
            failed_builds: 0,
            cancelled_builds: 0,
            timed_out_builds: 0,
            total_builds: 0,
            total_build_duration_secs: 0,
            last_build_date: None,
            start_date,
            build_image_revision,
        }
    }

    /// Average build duration in seconds, 0 if no build finished yet.
    pub fn average_build_duration_secs(&self) -> i64 {
        if self.total_builds == 0 {
            0
        } else {
            self.total_build_duration_secs / self.total_builds as i64
        }
    }

    /// Folds one terminal build outcome into the counters.
    pub fn record(&mut self, status: BuildStatus, duration_secs: i64, now: DateTime<Utc>) {
        match status {
            BuildStatus::Successful => self.successful_builds += 1,
            BuildStatus::Failed | BuildStatus::Error => self.failed_builds += 1,
            BuildStatus::Cancelled => self.cancelled_builds += 1,
            BuildStatus::Timeout => self.timed_out_builds += 1,
        }
        self.total_builds += 1;
        self.total_build_duration_secs += duration_secs.max(0);
        self.last_build_date = Some(now);
    }
}

/// Full registry entry for one agent: identity, capacity, load, health
/// and rolling statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent: AgentRef,

    /// Operator-settable capacity, always >= 1
    pub max_concurrent_builds: u32,

    /// Size of the agent's running set. Derived; must never exceed
    /// `max_concurrent_builds`.
    pub current_builds: u32,

    pub status: AgentStatus,

    /// Fingerprint of the key the agent authenticates repository access with
    pub public_key_fingerprint: Option<String>,

    /// Consecutive failures after which the agent self-pauses; 0 disables
    pub pause_after_consecutive_failures: u32,

    /// Failures since the last success; reset on success or manual resume
    pub consecutive_failures: u32,

    pub stats: AgentStats,

    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl AgentInfo {
    /// Whether the scheduler may assign this agent another job.
    pub fn has_capacity(&self) -> bool {
        self.current_builds < self.max_concurrent_builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_duration_empty() {
        let stats = AgentStats::new(Utc::now(), None);
        assert_eq!(stats.average_build_duration_secs(), 0);
    }

    #[test]
    fn test_record_updates_counters_and_average() {
        let now = Utc::now();
        let mut stats = AgentStats::new(now, None);

        stats.record(BuildStatus::Successful, 30, now);
        stats.record(BuildStatus::Failed, 10, now);
        stats.record(BuildStatus::Timeout, 20, now);

        assert_eq!(stats.successful_builds, 1);
        assert_eq!(stats.failed_builds, 1);
        assert_eq!(stats.timed_out_builds, 1);
        assert_eq!(stats.total_builds, 3);
        assert_eq!(stats.average_build_duration_secs(), 20);
        assert_eq!(stats.last_build_date, Some(now));
    }

    #[test]
    fn test_record_clamps_negative_duration() {
        let now = Utc::now();
        let mut stats = AgentStats::new(now, None);
        stats.record(BuildStatus::Successful, -5, now);
        assert_eq!(stats.total_build_duration_secs, 0);
    }
}
