//! Statistics API Handler

use axum::{
    Json,
    extract::{Query, State},
};

use crucible_core::dto::stats::{QueueStatistics, StatisticsFilter};

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::stats as stats_service;
use crate::store::QueueStore;

/// GET /statistics
/// Aggregate finished-build statistics, filtered by query parameters
pub async fn queue_statistics<S: QueueStore + Clone>(
    State(state): State<AppState<S>>,
    Query(filter): Query<StatisticsFilter>,
) -> ApiResult<Json<QueueStatistics>> {
    tracing::debug!("Computing queue statistics");

    let stats = stats_service::queue_statistics(&state.store, &filter).await?;
    Ok(Json(stats))
}
