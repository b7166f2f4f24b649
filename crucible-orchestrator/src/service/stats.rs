//! Statistics Service
//!
//! Aggregates over the finished-job history. Served from the durable history
//! only, so results are bounded-staleness by design and never block the
//! scheduler hot path.

use crucible_core::dto::stats::{QueueStatistics, StatisticsFilter};

use crate::store::{QueueStore, StoreError};

/// Service error type
#[derive(Debug)]
pub enum StatsError {
    StoreError(StoreError),
}

impl From<StoreError> for StatsError {
    fn from(err: StoreError) -> Self {
        StatsError::StoreError(err)
    }
}

/// Aggregate finished-build counts and the average duration, optionally
/// narrowed by course, exercise or completion-time window.
pub async fn queue_statistics<S: QueueStore>(
    store: &S,
    filter: &StatisticsFilter,
) -> Result<QueueStatistics, StatsError> {
    Ok(store.statistics(filter).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::make_job;
    use chrono::{Duration, Utc};
    use crucible_core::domain::job::{BuildStatus, FinishedBuildJob, PRIORITY_NORMAL};

    #[tokio::test]
    async fn test_statistics_window_filter() {
        let now = Utc::now();
        let store = MemoryStore::new();

        for (id, completed_at) in [("old", now - Duration::hours(2)), ("recent", now)] {
            let mut job = make_job(id, PRIORITY_NORMAL, now - Duration::hours(3));
            job.timing.build_start_date = Some(completed_at - Duration::seconds(30));
            store
                .append_finished(FinishedBuildJob::from_job(
                    &job,
                    BuildStatus::Successful,
                    completed_at,
                    None,
                ))
                .await
                .unwrap();
        }

        let all = queue_statistics(&store, &StatisticsFilter::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.average_build_duration_secs, 30);

        let recent = queue_statistics(
            &store,
            &StatisticsFilter {
                since: Some(now - Duration::hours(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(recent.total, 1);
    }
}
