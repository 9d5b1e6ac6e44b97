//! Per-request errors and the JSON error envelope
//!
//! Anything that stops the proxy from relaying a backend response ends up
//! here and is rendered as
//! `{"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}`.
//! Backend error statuses are not errors: they are relayed verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid proxy request: {0}")]
    InvalidRequest(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for `storefront_proxy_upstream_errors_total`, `None` when the
    /// backend was never involved.
    pub fn upstream_error_type(&self) -> Option<&'static str> {
        match self {
            Error::UpstreamTimeout(_) => Some("timeout"),
            Error::Upstream(_) => Some("connection"),
            Error::Cancelled => Some("cancelled"),
            Error::InvalidRequest(_) | Error::Internal(_) => None,
        }
    }

    pub fn into_response(self, request_id: &str) -> Response {
        error_response(self.status(), &self.to_string(), request_id)
    }
}

impl From<forwarder::Error> for Error {
    fn from(err: forwarder::Error) -> Self {
        match err {
            forwarder::Error::InvalidRequest(msg) => Error::InvalidRequest(msg),
            forwarder::Error::Timeout(msg) => Error::UpstreamTimeout(msg),
            forwarder::Error::Upstream(msg) => Error::Upstream(msg),
            forwarder::Error::Cancelled => Error::Cancelled,
        }
    }
}

pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}
