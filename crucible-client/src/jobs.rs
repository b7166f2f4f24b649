//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use crucible_core::domain::job::JobSummary;
use crucible_core::dto::job::{ResultNotice, ResultOutcome, SubmitJobRequest, SubmitJobResponse};

impl OrchestratorClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Submit a new build job
    ///
    /// # Returns
    /// The id assigned to the job
    pub async fn submit_job(&self, req: SubmitJobRequest) -> Result<SubmitJobResponse> {
        let url = format!("{}/job/submit", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get the current state of a job, live or finished
    pub async fn get_job(&self, job_id: &str) -> Result<JobSummary> {
        let url = format!("{}/job/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List pending jobs in scheduling order
    pub async fn list_pending_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = format!("{}/job/list/pending", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List running jobs
    pub async fn list_running_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = format!("{}/job/list/running", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a job
    ///
    /// Pending jobs are cancelled immediately; running jobs are flagged and
    /// resolve once their agent acknowledges.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/job/{}/cancel", self.base_url, job_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Result Reporting (agent-side)
    // =============================================================================

    /// Report the terminal outcome of a job this agent was running
    pub async fn report_result(&self, job_id: &str, outcome: ResultOutcome) -> Result<()> {
        let url = format!("{}/job/result", self.base_url);
        let notice = ResultNotice {
            job_id: job_id.to_string(),
            outcome,
        };
        let response = self.client.post(&url).json(&notice).send().await?;

        self.handle_empty_response(response).await
    }
}
