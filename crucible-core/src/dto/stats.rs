//! Statistics DTOs
//!
//! Aggregates over finished build jobs, grouped by course/exercise or time
//! window. Served from the durable history, so bounded-staleness reads are fine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filter for statistics queries; all fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsFilter {
    pub course_id: Option<i64>,
    pub exercise_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Aggregate counts over finished build jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub errored: u64,
    pub timed_out: u64,
    /// Average duration of builds that actually ran, in seconds
    pub average_build_duration_secs: i64,
}
