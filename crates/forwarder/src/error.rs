//! Forwarding errors
//!
//! Only transport-level failures are errors. Any HTTP status the backend
//! returns, 401 included, comes back as an `Ok` response.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Target URL or method could not be turned into an HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Upstream(err.to_string())
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Timeout(_) => "timeout",
            Error::Upstream(_) => "connection",
            Error::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
