//! Backend authentication client for the storefront proxy
//!
//! Talks to the backend's `/api/v1/auth/*` endpoints and owns the session
//! vocabulary shared by the proxy service: cookie names and lifetimes, the
//! token pair returned by login/refresh, and a best-effort JWT claims decoder
//! used to build the readable `user` cookie.
//!
//! Session flow:
//! 1. `token::login()` exchanges email/password for an access/refresh pair
//! 2. The service stores both as httpOnly cookies
//! 3. `forwarder` calls `token::request_refresh()` when the backend answers 401
//! 4. The explicit refresh route goes through `RefreshGate` so concurrent
//!    refreshes of one session share a single backend call
//! 5. `token::logout()` revokes the refresh token before cookies are cleared

pub mod constants;
pub mod error;
pub mod gate;
pub mod jwt;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use gate::RefreshGate;
pub use jwt::{Claims, UserSummary, decode_claims};
pub use token::{TokenResponse, login, logout, refresh_token, request_refresh};
