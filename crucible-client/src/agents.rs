//! Agent-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use crucible_core::domain::agent::AgentInfo;
use crucible_core::dto::agent::{CapacityUpdate, FailureThresholdUpdate, RegisterAgent};
use crucible_core::dto::job::AssignedJob;

impl OrchestratorClient {
    // =============================================================================
    // Registration & Liveness
    // =============================================================================

    /// Register this agent with the orchestrator
    ///
    /// Safe to call again after a restart; rolling statistics and pause
    /// state survive re-registration.
    pub async fn register_agent(&self, req: RegisterAgent) -> Result<AgentInfo> {
        let url = format!("{}/agent/register", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Send a heartbeat for an agent
    pub async fn heartbeat(&self, agent_name: &str) -> Result<()> {
        let url = format!("{}/agent/{}/heartbeat", self.base_url, agent_name);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// List all registered agents
    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>> {
        let url = format!("{}/agent/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get one agent's registry entry
    pub async fn get_agent(&self, agent_name: &str) -> Result<AgentInfo> {
        let url = format!("{}/agent/{}", self.base_url, agent_name);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Fetch the jobs currently assigned to an agent, with cancellation flags
    ///
    /// Agents poll this between heartbeats and start any job they are not
    /// already executing.
    pub async fn assigned_jobs(&self, agent_name: &str) -> Result<Vec<AssignedJob>> {
        let url = format!("{}/agent/{}/jobs", self.base_url, agent_name);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Operator Controls
    // =============================================================================

    /// Change an agent's capacity ceiling
    pub async fn set_capacity(&self, agent_name: &str, max_concurrent_builds: i32) -> Result<()> {
        let url = format!("{}/agent/{}/capacity", self.base_url, agent_name);
        let response = self
            .client
            .put(&url)
            .json(&CapacityUpdate {
                max_concurrent_builds,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Change an agent's auto-pause threshold. 0 disables auto-pause.
    pub async fn set_failure_threshold(&self, agent_name: &str, threshold: u32) -> Result<()> {
        let url = format!("{}/agent/{}/failure-threshold", self.base_url, agent_name);
        let response = self
            .client
            .put(&url)
            .json(&FailureThresholdUpdate {
                pause_after_consecutive_failures: threshold,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Pause an agent; its running jobs finish normally
    pub async fn pause_agent(&self, agent_name: &str) -> Result<()> {
        let url = format!("{}/agent/{}/pause", self.base_url, agent_name);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Resume a paused or self-paused agent
    pub async fn resume_agent(&self, agent_name: &str) -> Result<()> {
        let url = format!("{}/agent/{}/resume", self.base_url, agent_name);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
