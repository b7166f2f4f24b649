//! Agent DTOs
//!
//! Data transfer objects for agent registration and capacity management.

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentRef;

/// Registration/heartbeat announcement from an agent.
///
/// Re-registering updates the heartbeat and capacity but preserves the
/// agent's rolling statistics and pause state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgent {
    pub agent: AgentRef,

    /// Maximum number of jobs the agent runs concurrently, >= 1
    pub max_concurrent_builds: u32,

    pub public_key_fingerprint: Option<String>,

    pub build_image_revision: Option<String>,

    /// Per-agent auto-pause threshold; falls back to the orchestrator default
    /// when absent, 0 disables auto-pause
    pub pause_after_consecutive_failures: Option<u32>,
}

/// Operator request to change an agent's capacity ceiling.
///
/// Values <= 0 are rejected before any state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityUpdate {
    pub max_concurrent_builds: i32,
}

/// Operator request to change an agent's auto-pause threshold. 0 disables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureThresholdUpdate {
    pub pause_after_consecutive_failures: u32,
}
