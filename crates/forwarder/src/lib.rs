//! Authenticated request forwarding with transparent token refresh
//!
//! `Forwarder::forward` issues one request to the backend with the caller's
//! bearer token. If the backend answers 401 and a refresh token is available,
//! it asks the backend to refresh the session and replays the original request
//! exactly once. There is never a second refresh per invocation.
//!
//! The forwarder holds no session state: credentials arrive on each
//! `ForwardRequest` and nothing is cached between calls.

pub mod error;
pub mod forward;
pub mod headers;
pub mod request;

pub use error::{Error, Result};
pub use forward::Forwarder;
pub use headers::is_hop_by_hop;
pub use request::{ForwardRequest, ForwardRequestBuilder, RequestBody};
