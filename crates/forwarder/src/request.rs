//! Forward request description

use std::collections::HashMap;

use bytes::Bytes;
use common::Secret;
use serde_json::Value;

/// Outbound request body.
///
/// `Text` goes on the wire as-is. `Json` is serialized exactly once when the
/// request is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Json(Value),
}

impl RequestBody {
    /// Wire bytes, or `None` when the body is empty or a falsy JSON value
    /// (`null`, `false`, `0`, `""`).
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            RequestBody::Text(text) if text.is_empty() => None,
            RequestBody::Text(text) => Some(Bytes::from(text)),
            RequestBody::Json(value) if is_falsy(&value) => None,
            RequestBody::Json(Value::String(text)) => Some(Bytes::from(text)),
            RequestBody::Json(value) => Some(Bytes::from(value.to_string())),
        }
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_owned())
    }
}

/// A JSON string is already serialized text and stays untouched.
impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => RequestBody::Text(text),
            other => RequestBody::Json(other),
        }
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// One authenticated call to make on a caller's behalf.
///
/// Built once per inbound call through `ForwardRequest::builder` and consumed
/// by `Forwarder::forward`; there are no setters.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    method: String,
    target_url: String,
    body: Option<RequestBody>,
    headers: HashMap<String, String>,
    access_token: Option<Secret<String>>,
    refresh_token: Option<Secret<String>>,
}

impl ForwardRequest {
    /// Start a `GET` to an absolute URL with no body, headers or credentials.
    pub fn builder(target_url: impl Into<String>) -> ForwardRequestBuilder {
        ForwardRequestBuilder {
            request: ForwardRequest {
                method: String::from("GET"),
                target_url: target_url.into(),
                body: None,
                headers: HashMap::new(),
                access_token: None,
                refresh_token: None,
            },
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub(crate) fn into_parts(self) -> Parts {
        Parts {
            method: self.method,
            target_url: self.target_url,
            body: self.body,
            headers: self.headers,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
        }
    }
}

pub struct ForwardRequestBuilder {
    request: ForwardRequest,
}

impl ForwardRequestBuilder {
    /// Case-insensitive; a blank method keeps the `GET` default.
    pub fn method(mut self, method: &str) -> Self {
        let method = method.trim();
        if !method.is_empty() {
            self.request.method = method.to_ascii_uppercase();
        }
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.request.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.request.access_token = Secret::non_empty(Some(token.into()));
        self
    }

    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.request.refresh_token = Secret::non_empty(Some(token.into()));
        self
    }

    /// Attach a credential pair read from the caller's session; either may be absent.
    pub fn credentials(
        mut self,
        access: Option<Secret<String>>,
        refresh: Option<Secret<String>>,
    ) -> Self {
        self.request.access_token = access;
        self.request.refresh_token = refresh;
        self
    }

    pub fn build(self) -> ForwardRequest {
        self.request
    }
}

pub(crate) struct Parts {
    pub method: String,
    pub target_url: String,
    pub body: Option<RequestBody>,
    pub headers: HashMap<String, String>,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
}
