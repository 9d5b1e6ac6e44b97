//! Error types for backend auth calls

/// Errors from backend auth calls.
///
/// `Clone` so a single refresh outcome can be handed to every caller waiting
/// on the same in-flight refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Backend answered with a non-2xx status. `body` is relayed to the browser.
    #[error("backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
