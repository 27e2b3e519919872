//! Request-path error types
//!
//! Gate rejections map to distinct status codes. Bodies name only the
//! category so nothing is disclosed about why a credential was refused.

use crate::rate_limit::retry_after_secs;
use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Why the gate refused a request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("Service unavailable")]
    Unavailable,
}

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::Unauthorized => StatusCode::UNAUTHORIZED,
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Label used for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            GateError::Unauthorized => "unauthorized",
            GateError::RateLimited { .. } => "rate_limited",
            GateError::Unavailable => "unavailable",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status_code(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let GateError::RateLimited { retry_after } = self {
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }

        response
    }
}

/// Failures forwarding to the upstream MCP server
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No matching route found")]
    NoRoute,

    #[error("Upstream request timed out")]
    Timeout,

    #[error("Failed to build upstream request: {0}")]
    BadRequest(String),

    #[error("Failed to forward request: {0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoRoute => StatusCode::NOT_FOUND,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BadRequest(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
