//! API Error Handling
//!
//! Unified error type and conversions for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::{agent, job, result, stats};
use crate::store::StoreError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Queue store unavailable".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateJob(id) => ApiError::Conflict(format!("Duplicate job id: {id}")),
            StoreError::AgentNotFound(name) => {
                ApiError::NotFound(format!("Agent {name} not found"))
            }
            StoreError::Unavailable(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}

impl From<job::JobError> for ApiError {
    fn from(err: job::JobError) -> Self {
        match err {
            job::JobError::NotFound(id) => ApiError::NotFound(format!("Job {id} not found")),
            job::JobError::Duplicate(id) => ApiError::Conflict(format!("Duplicate job id: {id}")),
            job::JobError::InvalidState(msg) => ApiError::Conflict(msg),
            job::JobError::ValidationError(msg) => ApiError::BadRequest(msg),
            job::JobError::StoreError(err) => err.into(),
        }
    }
}

impl From<result::ResultError> for ApiError {
    fn from(err: result::ResultError) -> Self {
        match err {
            result::ResultError::StaleNotice(id) => {
                ApiError::Conflict(format!("Job {id} is not running"))
            }
            result::ResultError::StoreError(err) => err.into(),
        }
    }
}

impl From<agent::AgentError> for ApiError {
    fn from(err: agent::AgentError) -> Self {
        match err {
            agent::AgentError::NotFound(name) => {
                ApiError::NotFound(format!("Agent {name} not found"))
            }
            agent::AgentError::ValidationError(msg) => ApiError::BadRequest(msg),
            agent::AgentError::StoreError(err) => err.into(),
        }
    }
}

impl From<stats::StatsError> for ApiError {
    fn from(err: stats::StatsError) -> Self {
        match err {
            stats::StatsError::StoreError(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
