use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure talking to the hosted search engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("search engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failure fetching a web page for the reader tool.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

/// Reasons an agent run stops before `Done`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] anyhow::Error),

    #[error("run exceeded {0} model turns")]
    StepLimit(usize),

    #[error("cancelled")]
    Cancelled,
}

/// A pushed stream fragment that could not be decoded.
#[derive(Debug, Error)]
pub enum StreamParseError {
    #[error("fragment is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by HTTP handlers before a stream starts.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed before streaming");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
