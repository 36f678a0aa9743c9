//! API Error Handling
//!
//! Unified error types and conversion for API responses. Every error body
//! is a `{code, message}` pair.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shipwright_core::dto::error::RemoteError;

use crate::service::{agent_service, job_service, log_service};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
            }
        };

        (status, Json(RemoteError::new(code, message))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<agent_service::AgentError> for ApiError {
    fn from(err: agent_service::AgentError) -> Self {
        match err {
            agent_service::AgentError::NotFound(id) => {
                ApiError::NotFound(format!("Agent {} not found", id))
            }
            agent_service::AgentError::ValidationError(msg) => ApiError::BadRequest(msg),
            agent_service::AgentError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<job_service::JobError> for ApiError {
    fn from(err: job_service::JobError) -> Self {
        match err {
            job_service::JobError::NotFound(id) => {
                ApiError::NotFound(format!("Job {} not found", id))
            }
            job_service::JobError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<log_service::LogError> for ApiError {
    fn from(err: log_service::LogError) -> Self {
        match err {
            log_service::LogError::JobNotFound(id) => {
                ApiError::NotFound(format!("Job {} not found", id))
            }
            log_service::LogError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
