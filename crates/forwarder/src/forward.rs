//! The forward / refresh / retry sequence
//!
//! Per invocation, in order:
//! 1. primary request to the target
//! 2. on 401 with a refresh token: one POST to the backend refresh endpoint
//! 3. on refresh success: one replay of the primary request
//!
//! At most two calls to the target and one to the refresh endpoint. The replay
//! carries the same headers as the primary request, including the original
//! `Authorization` value: the rotated token reaches the browser through the
//! session cookies and is picked up on the caller's next request.

use std::collections::HashMap;
use std::future::Future;

use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::headers::is_transport_managed;
use crate::request::ForwardRequest;

/// Issues authenticated requests against one backend.
///
/// Cheap to clone; holds no per-session state.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    api_base: String,
}

/// A request ready to be sent (and possibly sent again).
struct Prepared {
    method: Method,
    url: Url,
    headers: HeaderMap,
    payload: Option<Bytes>,
}

impl Forwarder {
    /// `api_base` locates the refresh endpoint; target URLs are taken as given.
    pub fn new(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }

    /// Send `request`, refreshing the session and replaying once on 401.
    ///
    /// Backend statuses, 401 included, are returned as `Ok`. Transport
    /// failures on the primary or replayed request are returned as `Err`;
    /// transport failures on the refresh call count as a failed refresh.
    #[instrument(skip_all, fields(method = %request.method(), url = %request.target_url()))]
    pub async fn forward(&self, request: ForwardRequest) -> Result<reqwest::Response> {
        let parts = request.into_parts();
        let access_token = parts.access_token.as_ref().map(|t| t.expose().as_str());
        let prepared = Prepared {
            method: parse_method(&parts.method)?,
            url: parse_url(&parts.target_url)?,
            headers: build_headers(&parts.headers, access_token),
            payload: parts.body.and_then(|body| body.into_payload()),
        };

        let response = self.send(&prepared).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(refresh_token) = parts.refresh_token else {
            debug!("upstream returned 401 and no refresh token is available");
            record_refresh("skipped");
            return Ok(response);
        };

        if !self.refresh(refresh_token.expose()).await {
            return Ok(response);
        }

        debug!("session refreshed, replaying request with the original credential");
        self.send(&prepared).await
    }

    /// `forward`, abandoned as soon as `cancel` completes.
    ///
    /// Cancellation drops the in-progress sequence wherever it is; it never
    /// leads to another refresh.
    pub async fn forward_until<F>(
        &self,
        request: ForwardRequest,
        cancel: F,
    ) -> Result<reqwest::Response>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                debug!("forward cancelled by caller");
                Err(Error::Cancelled)
            }
            result = self.forward(request) => result,
        }
    }

    async fn send(&self, prepared: &Prepared) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .request(prepared.method.clone(), prepared.url.clone())
            .headers(prepared.headers.clone());
        if let Some(payload) = &prepared.payload {
            builder = builder.body(payload.clone());
        }
        builder.send().await.map_err(Error::transport)
    }

    /// One refresh attempt. `true` only on a 2xx from the refresh endpoint.
    async fn refresh(&self, refresh_token: &str) -> bool {
        match backend_auth::request_refresh(&self.client, &self.api_base, refresh_token).await {
            Ok(response) if response.status().is_success() => {
                record_refresh("refreshed");
                true
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "token refresh rejected");
                record_refresh("rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "token refresh request failed");
                record_refresh("error");
                false
            }
        }
    }
}

fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::InvalidRequest(format!("invalid HTTP method: {method}")))
}

fn parse_url(target_url: &str) -> Result<Url> {
    let url = Url::parse(target_url)
        .map_err(|e| Error::InvalidRequest(format!("invalid target URL {target_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidRequest(format!(
            "target URL must be http(s), got: {target_url}"
        )));
    }
    Ok(url)
}

/// Caller headers plus `Authorization` (overwritten when a token is given)
/// and `Accept` (defaulted to JSON when the caller set none).
fn build_headers(caller: &HashMap<String, String>, access_token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in caller {
        if is_transport_managed(name) {
            continue;
        }
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }

    if let Some(token) = access_token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("access token is not a valid header value, sending without it"),
        }
    }

    headers
        .entry(ACCEPT)
        .or_insert(HeaderValue::from_static("application/json"));

    headers
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("forwarder_refresh_attempts_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_auth::REFRESH_PATH;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forwarder(server: &MockServer) -> Forwarder {
        Forwarder::new(reqwest::Client::new(), server.uri())
    }

    async fn received(server: &MockServer) -> Vec<wiremock::Request> {
        server.received_requests().await.unwrap()
    }

    async fn count_path(server: &MockServer, p: &str) -> usize {
        received(server)
            .await
            .iter()
            .filter(|r| r.url.path() == p)
            .count()
    }

    async fn mount_refresh(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_json(serde_json::json!({"refresh_token": "rt"})))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(serde_json::json!({"ok": true})),
            )
            .mount(server)
            .await;
    }

    /// First call to `p` answers 401, later calls get `then`.
    async fn mount_401_then(server: &MockServer, p: &str, then: ResponseTemplate) {
        Mock::given(path(p))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauth"))
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(path(p)).respond_with(then).mount(server).await;
    }

    #[tokio::test]
    async fn success_on_first_attempt_makes_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/products"))
            .and(header("authorization", "Bearer t"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let request = ForwardRequest::builder(format!("{}/api/v1/products", server.uri()))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "[]");
        assert_eq!(received(&server).await.len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_refreshes_and_retries_once() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        mount_401_then(
            &server,
            "/second",
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"hello": "world"})),
        )
        .await;

        let request = ForwardRequest::builder(format!("{}/second", server.uri()))
            .method("GET")
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json, serde_json::json!({"hello": "world"}));

        let requests = received(&server).await;
        assert_eq!(requests.len(), 3, "primary + refresh + retry");
        assert_eq!(requests[0].url.path(), "/second");
        assert_eq!(requests[1].url.path(), REFRESH_PATH);
        assert_eq!(requests[2].url.path(), "/second");
        // The replay reuses the credential from the first attempt
        assert_eq!(requests[2].headers.get("authorization").unwrap(), "Bearer t");
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_is_returned_as_is() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        Mock::given(path("/orders"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauth"))
            .mount(&server)
            .await;

        let request = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .access_token("t")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.text().await.unwrap(), "unauth");
        assert_eq!(received(&server).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_returns_original_401() {
        let server = MockServer::start().await;
        mount_refresh(&server, 401).await;
        mount_401_then(&server, "/orders", ResponseTemplate::new(200)).await;

        let request = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.text().await.unwrap(), "unauth");
        assert_eq!(received(&server).await.len(), 2, "primary + refresh, no retry");
    }

    #[tokio::test]
    async fn unreachable_refresh_endpoint_returns_original_401() {
        let server = MockServer::start().await;
        Mock::given(path("/orders"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauth"))
            .mount(&server)
            .await;

        let forwarder = Forwarder::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let request = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder.forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(received(&server).await.len(), 1);
    }

    #[tokio::test]
    async fn second_401_is_not_refreshed_again() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        Mock::given(path("/orders"))
            .respond_with(ResponseTemplate::new(401).set_body_string("still unauth"))
            .mount(&server)
            .await;

        let request = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(received(&server).await.len(), 3);
        assert_eq!(count_path(&server, REFRESH_PATH).await, 1);
    }

    #[tokio::test]
    async fn retry_result_is_returned_even_when_it_fails() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        mount_401_then(
            &server,
            "/orders",
            ResponseTemplate::new(503).set_body_string("maintenance"),
        )
        .await;

        let request = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().await.unwrap(), "maintenance");
    }

    #[tokio::test]
    async fn non_401_errors_pass_through_without_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        for (p, status) in [("/forbidden", 403), ("/missing", 404), ("/broken", 500)] {
            Mock::given(path(p))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
            let request = ForwardRequest::builder(format!("{}{p}", server.uri()))
                .access_token("t")
                .refresh_token("rt")
                .build();
            let response = forwarder(&server).forward(request).await.unwrap();
            assert_eq!(response.status().as_u16(), status);
        }
        assert_eq!(count_path(&server, REFRESH_PATH).await, 0);
    }

    #[tokio::test]
    async fn structured_body_is_serialized_once_and_resent_on_retry() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        mount_401_then(&server, "/cart", ResponseTemplate::new(201)).await;

        let request = ForwardRequest::builder(format!("{}/cart", server.uri()))
            .method("post")
            .body(serde_json::json!({"sku": "A-1", "qty": 2}))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let target_calls: Vec<_> = received(&server)
            .await
            .into_iter()
            .filter(|r| r.url.path() == "/cart")
            .collect();
        assert_eq!(target_calls.len(), 2);
        for call in target_calls {
            assert_eq!(call.method.as_str(), "POST");
            let sent: serde_json::Value = serde_json::from_slice(&call.body).unwrap();
            assert_eq!(sent, serde_json::json!({"sku": "A-1", "qty": 2}));
        }
    }

    #[tokio::test]
    async fn string_body_is_sent_verbatim() {
        let server = MockServer::start().await;
        Mock::given(path("/cart"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let raw = r#"{"sku":"A-1"}"#;
        let request = ForwardRequest::builder(format!("{}/cart", server.uri()))
            .method("PUT")
            .body(raw)
            .build();
        forwarder(&server).forward(request).await.unwrap();

        let requests = received(&server).await;
        assert_eq!(requests[0].body, raw.as_bytes());
    }

    #[tokio::test]
    async fn caller_accept_is_kept_and_authorization_overwritten() {
        let server = MockServer::start().await;
        Mock::given(path("/export"))
            .and(header("accept", "text/csv"))
            .and(header("authorization", "Bearer cookie-token"))
            .and(header("x-trace", "abc"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request = ForwardRequest::builder(format!("{}/export", server.uri()))
            .header("Accept", "text/csv")
            .header("Authorization", "Bearer from-browser")
            .header("x-trace", "abc")
            .header("Connection", "close")
            .access_token("cookie-token")
            .build();
        let response = forwarder(&server).forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn caller_authorization_kept_without_access_token() {
        let server = MockServer::start().await;
        Mock::given(path("/public"))
            .and(header("authorization", "Basic abc"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request = ForwardRequest::builder(format!("{}/public", server.uri()))
            .header("authorization", "Basic abc")
            .build();
        forwarder(&server).forward(request).await.unwrap();
    }

    #[test]
    fn invalid_headers_are_skipped() {
        let caller = HashMap::from([
            ("bad header".to_string(), "v".to_string()),
            ("x-ok".to_string(), "fine".to_string()),
            ("x-bad-value".to_string(), "line\nbreak".to_string()),
        ]);
        let headers = build_headers(&caller, None);
        assert_eq!(headers.get("x-ok").unwrap(), "fine");
        assert!(headers.get("x-bad-value").is_none());
        assert_eq!(headers.len(), 2, "x-ok + default accept");
    }

    #[tokio::test]
    async fn relative_url_is_rejected_without_a_call() {
        let server = MockServer::start().await;
        let request = ForwardRequest::builder("/api/v1/products").build();
        let err = forwarder(&server).forward(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "got {err:?}");
        assert!(received(&server).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let server = MockServer::start().await;
        let request = ForwardRequest::builder(server.uri())
            .method("GE T")
            .build();
        let err = forwarder(&server).forward(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn transport_failure_on_primary_propagates() {
        let forwarder = Forwarder::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let request = ForwardRequest::builder("http://127.0.0.1:1/orders")
            .refresh_token("rt")
            .build();
        let err = forwarder.forward(request).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_target_surfaces_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let forwarder = Forwarder::new(client, server.uri());
        let request = ForwardRequest::builder(format!("{}/slow", server.uri())).build();
        let err = forwarder.forward(request).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn cancellation_during_retry_does_not_refresh_again() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200).await;
        mount_401_then(
            &server,
            "/orders",
            ResponseTemplate::new(200).set_delay(Duration::from_secs(5)),
        )
        .await;

        let request = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .access_token("t")
            .refresh_token("rt")
            .build();
        let err = forwarder(&server)
            .forward_until(request, tokio::time::sleep(Duration::from_millis(500)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled), "got {err:?}");
        assert_eq!(count_path(&server, REFRESH_PATH).await, 1);
    }

    #[tokio::test]
    async fn already_cancelled_forward_sends_nothing() {
        let server = MockServer::start().await;
        let request = ForwardRequest::builder(format!("{}/orders", server.uri())).build();
        let err = forwarder(&server)
            .forward_until(request, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(received(&server).await.is_empty());
    }

    #[tokio::test]
    async fn refresh_outcomes_are_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let server = MockServer::start().await;
        mount_refresh(&server, 500).await;
        Mock::given(path("/orders"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let with_refresh = ForwardRequest::builder(format!("{}/orders", server.uri()))
            .refresh_token("rt")
            .build();
        forwarder(&server).forward(with_refresh).await.unwrap();
        let without = ForwardRequest::builder(format!("{}/orders", server.uri())).build();
        forwarder(&server).forward(without).await.unwrap();

        let output = handle.render();
        assert!(output.contains("forwarder_refresh_attempts_total"), "got: {output}");
        assert!(output.contains("outcome=\"rejected\""), "got: {output}");
        assert!(output.contains("outcome=\"skipped\""), "got: {output}");
    }
}
