//! HTTP-facing errors for the token lookup API
//!
//! Pool errors are mapped to a fixed set of client messages. Upstream error
//! codes, store paths and similar internals stay in the logs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ApiError {
    #[error("missing appId")]
    MissingAppId,

    #[error("not found")]
    NotFound,

    #[error("fetch failed")]
    FetchFailed,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingAppId => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::FetchFailed => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<token_pool::Error> for ApiError {
    fn from(e: token_pool::Error) -> Self {
        match e {
            token_pool::Error::EmptyAppId => ApiError::MissingAppId,
            token_pool::Error::NotFound(_) => ApiError::NotFound,
            token_pool::Error::NotFetched(_) | token_pool::Error::Fetch(_) => {
                ApiError::FetchFailed
            }
            token_pool::Error::Io(_) | token_pool::Error::Parse(_) => ApiError::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
