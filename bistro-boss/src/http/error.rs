use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized access")]
    Unauthorized,
    #[error("forbidden access")]
    Forbidden,
    #[error("invalid id")]
    InvalidId,
    #[error("invalid request body: {detail}")]
    InvalidBody { status: StatusCode, detail: String },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("database failure: {0}")]
    Database(#[from] StoreError),
    #[error("internal server error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: bool,
    message: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::InvalidId | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidBody { status, .. } => *status,
            ApiError::Database(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Client-facing message. Store errors never leak their detail.
    fn public_message(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized access",
            ApiError::Forbidden => "forbidden access",
            ApiError::InvalidId => "invalid id",
            ApiError::InvalidBody { .. } => "invalid request body",
            ApiError::InvalidQuery(_) => "invalid query",
            ApiError::Database(_) | ApiError::Internal => "internal server error",
        }
    }
}

/// Keeps axum's status (400, 415 or 422) but answers in the JSON error shape.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection, "rejected request body");
        ApiError::InvalidBody {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(error = %rejection, "rejected query string");
        ApiError::InvalidQuery(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Database(source) = &self {
            error!(error = %source, "store operation failed");
        }

        let body = Json(ErrorBody {
            error: true,
            message: self.public_message(),
        });
        let mut response = (self.status(), body).into_response();
        if self.is_unauthorized() {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"bistro-boss\""),
            );
        }
        response
    }
}
