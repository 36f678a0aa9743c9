//! API Error Handling
//!
//! Every failed RPC answers with a status code and a `{code, message}` body.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shipwright_core::dto::error::RemoteError;

use crate::executor::pr::PrError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The request was understood but an upstream refused it
    Rejected { code: String, message: String },
    /// An upstream (git remote, GitHub) could not be reached or failed
    Upstream { code: String, message: String },
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request".to_string(), msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found".to_string(), msg),
            ApiError::Rejected { code, message } => (StatusCode::UNPROCESSABLE_ENTITY, code, message),
            ApiError::Upstream { code, message } => {
                tracing::warn!("Upstream error ({}): {}", code, message);
                (StatusCode::BAD_GATEWAY, code, message)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string(), msg)
            }
        };

        (status, Json(RemoteError::new(code, message))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PrError> for ApiError {
    fn from(err: PrError) -> Self {
        match err {
            PrError::MissingWorktree(_) => ApiError::NotFound(err.to_string()),
            PrError::UnsupportedRemote(_) => ApiError::BadRequest(err.to_string()),
            PrError::Rejected { status, .. } if status < 500 => ApiError::Rejected {
                code: "pr_rejected".to_string(),
                message: err.to_string(),
            },
            PrError::Rejected { .. } | PrError::Http(_) => ApiError::Upstream {
                code: "github_unavailable".to_string(),
                message: err.to_string(),
            },
            PrError::Git(_) => ApiError::Upstream {
                code: "git_failed".to_string(),
                message: err.to_string(),
            },
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
