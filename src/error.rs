use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::logic::transform::TransformError;
use crate::model::Method;
use crate::store::DataError;

/// Request-level failure. Each variant maps to one HTTP status.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Data(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::MissingParameter { .. } => AppError::BadRequest(err.to_string()),
            DataError::UnknownFunction(_) | DataError::Failed { .. } | DataError::Unavailable(_) => {
                AppError::Data(err.to_string())
            }
        }
    }
}

impl From<TransformError> for AppError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Failed(message) => AppError::Internal(message),
            TransformError::Unauthorized(message) => AppError::Unauthorized(message),
        }
    }
}

/// Problems found while turning a route file into a route table.
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("failed to read route file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse route file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid route pattern: {0}")]
    InvalidPattern(String),
    #[error("route {method} {pattern} conflicts with {method} {existing}")]
    Conflict {
        method: Method,
        pattern: String,
        existing: String,
    },
    #[error("route {method} {pattern}: {stage} '{name}' is not registered")]
    UnknownCallable {
        method: Method,
        pattern: String,
        stage: &'static str,
        name: String,
    },
}
