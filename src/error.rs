//! Error types for startup, delivery and request handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems found while loading the config. The process exits on these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("at least one route is required")]
    NoRoutes,

    #[error("route {index} ({path}): {reason}")]
    InvalidRoute {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("invalid rate limit {spec:?}: {reason}")]
    InvalidRateLimit { spec: String, reason: String },

    #[error("invalid server settings: {0}")]
    InvalidServer(String),
}

/// Delivery failures reported by a notifier.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("decoding response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("api error: {0}")]
    Api(String),
}

impl NotifyError {
    // reqwest puts the request URL in its Display output, and ours embeds the bot token
    pub fn transport(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.without_url())
    }

    pub fn decode(err: reqwest::Error) -> Self {
        NotifyError::Decode(err.without_url())
    }
}

/// Per-request failures, rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Rate limit exceeded. Please try again later.")]
    TooManyRequests,

    #[error("Failed to send message. Please try again later.")]
    Delivery,

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::Delivery | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
