//! `POST /api/proxy`
//!
//! The browser describes the backend call it wants as
//! `{ method, path, headers, body }`; the session credentials come from its
//! cookies and never reach browser code. The backend response is relayed
//! verbatim except for `Set-Cookie`, which only the session routes may set.

use std::collections::HashMap;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use backend_auth::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use forwarder::{ForwardRequest, is_hop_by_hop};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::cookies;
use crate::error::Error;
use crate::metrics::{record_request, record_upstream_error};
use crate::state::AppState;

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// The browser's description of one backend call.
#[derive(Debug, Deserialize)]
pub struct ProxyCall {
    #[serde(default)]
    pub method: Option<String>,
    pub path: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ProxyCall {
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| Error::InvalidRequest(format!("malformed JSON body: {e}")))?;
        if !value.is_object() {
            return Err(Error::InvalidRequest(
                "request body must be a JSON object".into(),
            ));
        }
        let call: ProxyCall = serde_json::from_value(value)
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        if !call.path.starts_with('/') {
            return Err(Error::InvalidRequest(format!(
                "path must start with '/', got: {}",
                call.path
            )));
        }
        Ok(call)
    }
}

pub async fn proxy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy_request(&state, &headers, &body, request_id).await
}

/// Parse the call, forward it with the caller's credentials and relay the
/// outcome. Failures become the JSON error envelope; backend statuses never do.
#[instrument(
    skip_all,
    fields(request_id = %request_id, method = tracing::field::Empty, path = tracing::field::Empty)
)]
pub async fn proxy_request(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    request_id: String,
) -> Response {
    let start = Instant::now();
    let _in_flight = state.metrics.begin_request();

    let (method, result) = match ProxyCall::parse(body) {
        Ok(call) => {
            let method = call
                .method
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or("GET")
                .to_ascii_uppercase();
            let span = tracing::Span::current();
            span.record("method", method.as_str());
            span.record("path", call.path.as_str());
            (method, forward(state, headers, call).await)
        }
        Err(e) => ("unknown".to_string(), Err(e)),
    };

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            state.metrics.record_error();
            if let Some(error_type) = e.upstream_error_type() {
                record_upstream_error(error_type);
                error!(error = %e, "proxy call failed");
            } else {
                debug!(error = %e, "rejecting proxy call");
            }
            e.into_response(&request_id)
        }
    };

    let status = response.status().as_u16();
    let duration = start.elapsed();
    record_request(status, &method, duration.as_secs_f64());
    info!(
        status,
        duration_ms = duration.as_millis() as u64,
        "proxy call completed"
    );
    response
}

async fn forward(
    state: &AppState,
    headers: &HeaderMap,
    call: ProxyCall,
) -> Result<Response, Error> {
    let target_url = format!("{}{}", state.api_base, call.path);

    let mut builder = ForwardRequest::builder(target_url)
        .method(call.method.as_deref().unwrap_or_default())
        .credentials(
            cookies::get_secret(headers, ACCESS_TOKEN_COOKIE),
            cookies::get_secret(headers, REFRESH_TOKEN_COOKIE),
        );
    if let Some(extra) = call.headers {
        builder = builder.headers(extra);
    }
    if let Some(body) = call.body {
        builder = builder.body(body);
    }

    let upstream = state
        .forwarder
        .forward_until(builder.build(), state.cancel.cancelled())
        .await?;
    relay(upstream).await
}

/// Copy status, headers (minus `Set-Cookie` and hop-by-hop) and body.
async fn relay(upstream: reqwest::Response) -> Result<Response, Error> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| Error::Internal(format!("invalid upstream status: {e}")))?;
    let upstream_headers = upstream.headers().clone();

    let body = upstream
        .bytes()
        .await
        .map_err(|e| Error::Upstream(format!("failed to read upstream body: {e}")))?;

    let mut response = Response::builder().status(status);
    for (name, value) in &upstream_headers {
        if *name == SET_COOKIE || *name == CONTENT_LENGTH || is_hop_by_hop(name.as_str()) {
            continue;
        }
        response = response.header(name.as_str(), value.as_bytes());
    }
    response
        .body(Body::from(body))
        .map_err(|e| Error::Internal(format!("response build error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_call() {
        let call = ProxyCall::parse(
            br#"{"method":"post","path":"/api/v1/cart","headers":{"x-trace":"1"},"body":{"qty":2}}"#,
        )
        .unwrap();
        assert_eq!(call.method.as_deref(), Some("post"));
        assert_eq!(call.path, "/api/v1/cart");
        assert_eq!(call.headers.unwrap()["x-trace"], "1");
        assert_eq!(call.body.unwrap(), serde_json::json!({"qty": 2}));
    }

    #[test]
    fn method_headers_and_body_are_optional() {
        let call = ProxyCall::parse(br#"{"path":"/api/v1/products"}"#).unwrap();
        assert!(call.method.is_none());
        assert!(call.headers.is_none());
        assert!(call.body.is_none());
    }

    #[test]
    fn rejects_bad_input() {
        let cases: [&[u8]; 6] = [
            b"not json",
            br#"{"method":"GET"}"#,
            br#"["GET","/api/v1/products"]"#,
            br#"{"path":"api/v1/products"}"#,
            br#"{"path":"http://evil.example/steal"}"#,
            br#"{"path":"/x","headers":{"x-num":1}}"#,
        ];
        for raw in cases {
            let result = ProxyCall::parse(raw);
            assert!(
                matches!(result, Err(Error::InvalidRequest(_))),
                "{} should be rejected",
                String::from_utf8_lossy(raw)
            );
        }
    }
}
