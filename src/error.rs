//! HTTP error type.
//!
//! Every error response has the same body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "sessionId is required" } }
//! ```
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `BadRequest` | 400 | `bad_request` |
//! | `Unauthorized` | 401 | `unauthorized` |
//! | `NotFound` | 404 | `not_found` |
//! | `Upstream` | 502 | `upstream_error` |
//! | `SortFailed` | 502 | `sort_failed` |
//! | `Unavailable` | 503 | `unavailable` |
//! | `Internal` | 500 | `internal` |

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::ContentError;
use crate::dispatch::SubmitError;
use crate::summarize::GenerationError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// The model provider failed on a synchronous path.
    #[error("{0}")]
    Upstream(String),

    /// The sort job for the session ended in a failure record.
    #[error("{0}")]
    SortFailed(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) | ApiError::SortFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::SortFailed(_) => "sort_failed",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }
}

/// Error body shared by the server and the HTTP client.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "request failed");
                format!("{:#}", e)
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::SessionNotFound(_) => ApiError::NotFound(err.to_string()),
            SubmitError::UnknownArticle { .. } | SubmitError::NoArticles(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SubmitError::QueueFull | SubmitError::WorkerStopped => {
                ApiError::Unavailable(err.to_string())
            }
            SubmitError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Content(ContentError::Missing(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            GenerationError::Content(ContentError::Fetch(_)) | GenerationError::Model { .. } => {
                ApiError::Upstream(err.to_string())
            }
            GenerationError::Content(ContentError::Store(e)) | GenerationError::Store(e) => {
                ApiError::Internal(e)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
