//! Statistics API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use crucible_core::dto::stats::{QueueStatistics, StatisticsFilter};

impl OrchestratorClient {
    /// Aggregate finished-build statistics, optionally filtered by course,
    /// exercise or completion-time window
    pub async fn queue_statistics(&self, filter: &StatisticsFilter) -> Result<QueueStatistics> {
        let url = format!("{}/statistics", self.base_url);
        let response = self.client.get(&url).query(filter).send().await?;

        self.handle_response(response).await
    }
}
